//! Built-in policy table for the pet health API
//!
//! | read route        | path                                | ttl  |
//! |-------------------|-------------------------------------|------|
//! | `user_profile`    | `GET /users/me`                     | 300  |
//! | `user_stats`      | `GET /users/me/stats`               | 600  |
//! | `pet_list`        | `GET /pets`                         | 300  |
//! | `pet_detail`      | `GET /pets/{petId}`                 | 300  |
//! | `pet_analyses`    | `GET /pets/{petId}/analyses`        | 300  |
//! | `pet_stats`       | `GET /pets/{petId}/stats`           | 600  |
//! | `analysis_list`   | `GET /analyses`                     | 300  |
//! | `analysis_detail` | `GET /analyses/{analysisId}`        | 600  |
//! | `community_feed`  | `GET /community/posts`              | 120  |
//! | `community_post`  | `GET /community/posts/{postId}`     | 300  |
//! | `global_stats`    | `GET /stats`                        | 900  |

use super::{CacheCondition, KeyStrategy, KeyTemplate, PolicyTable, ReadPolicy, Resource, WriteRule};

fn template(source: &'static str) -> KeyStrategy {
    KeyTemplate::parse(source)
        .map(|template| KeyStrategy::Template { template })
        .unwrap_or_default()
}

fn read(resource: Resource, ttl_secs: u64, key: &'static str) -> ReadPolicy {
    ReadPolicy::new(resource, ttl_secs).with_key(template(key))
}

pub(super) fn pet_health() -> PolicyTable {
    use Resource::*;

    PolicyTable::empty()
        .with_read("user_profile", read(User, 300, "user:{user}:profile"))
        .with_read("user_stats", read(Stats, 600, "user:{user}:stats{query}"))
        .with_read("pet_list", read(Pet, 300, "user:{user}:pets{query}"))
        .with_read("pet_detail", read(Pet, 300, "user:{user}:pet:{petId}"))
        .with_read(
            "pet_analyses",
            read(Analysis, 300, "user:{user}:pet:{petId}:analyses{query}"),
        )
        .with_read(
            "pet_stats",
            read(Stats, 600, "user:{user}:pet:{petId}:stats{query}"),
        )
        .with_read("analysis_list", read(Analysis, 300, "user:{user}:analyses{query}"))
        .with_read(
            "analysis_detail",
            read(Analysis, 600, "user:{user}:analysis:{analysisId}"),
        )
        .with_read("community_feed", read(Community, 120, "community:posts{query}"))
        .with_read("community_post", read(Community, 300, "community:post:{postId}"))
        .with_read(
            "global_stats",
            read(Stats, 900, "stats:global{query}").with_condition(CacheCondition::Ok),
        )
        .with_write("update_profile", WriteRule::new([User]))
        .with_write("delete_account", WriteRule::new([User, Community, Stats]))
        .with_write("create_pet", WriteRule::new([Pet, Stats]))
        .with_write("update_pet", WriteRule::new([Pet, Stats]))
        .with_write("delete_pet", WriteRule::new([Pet, Analysis, Stats]))
        .with_write("create_analysis", WriteRule::new([Analysis, Stats]))
        .with_write("update_analysis", WriteRule::new([Analysis, Stats, User]))
        .with_write("delete_analysis", WriteRule::new([Analysis, Stats, User]))
        .with_write("create_post", WriteRule::new([Community]))
        .with_write("update_post", WriteRule::new([Community]))
        .with_write("delete_post", WriteRule::new([Community]))
        .with_write("moderate_post", WriteRule::new([Community]))
}
