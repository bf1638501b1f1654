//! Search backend.
//!
//! Serves index-bound resources through a [`SearchClient`]. Filters on
//! query fields become full-text clauses; every other filter becomes a
//! structured clause. Declared facets are requested as aggregations and
//! returned as [`FacetView`](crate::schema::FacetView)s on the collection.
//!
//! Resources served here are read-only.
//!
//! ```
//! use std::sync::Arc;
//! use apisvc_persistence::backends::search::{SearchBackend, StaticSearchClient};
//!
//! let backend = SearchBackend::new(Arc::new(StaticSearchClient::new()));
//! assert!(backend.config().track_total_hits);
//! ```

mod backend;
mod client;
mod query_builder;
mod storage;

pub use backend::{SearchBackend, SearchBackendConfig};
pub use client::{SearchClient, StaticSearchClient};
pub use query_builder::{
    FIELD_DELIMITER, SearchRequestBuilder, facet_search_field, filter_clause, search_field_name,
};

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use crate::schema::{
        Field, QueryOption, RangeFacet, ResourceBuilder, SchemaRegistry, StructDescription,
        TermsFacet,
    };

    /// A `user_search` resource bound to the `users` index.
    pub fn registry() -> SchemaRegistry {
        let skill = Arc::new(
            StructDescription::new("Skill").field(Field::string("name").filter_ext(".raw")),
        );
        SchemaRegistry::builder()
            .resource(
                ResourceBuilder::new("user_search")
                    .index("users")
                    .field(Field::integer("id").primary_key())
                    .field(Field::string("name").sort_ext(".raw").filter_ext(".raw"))
                    .field(Field::string("bio").nullable())
                    .field(Field::integer("yrs_experience"))
                    .field(Field::string("location").nullable())
                    .field(Field::datetime("joined").nullable())
                    .field(Field::list("skills", Field::structure("skill", skill)).nullable())
                    .field(Field::multi_match_query("q", ["name", "bio"]))
                    .option(
                        QueryOption::typed("f_skills_size", Field::integer("f_skills_size"))
                            .default_value(10),
                    )
                    .facet(
                        TermsFacet::new("f_skills", "skills__name")
                            .title("Skills")
                            .size_option("f_skills_size"),
                    )
                    .facet(
                        RangeFacet::new("f_yrs", "yrs_experience")
                            .title("Experience")
                            .add(Some(0), Some(2))
                            .add(Some(3), Some(5))
                            .add(Some(6), None::<i64>),
                    )
                    .facet(
                        RangeFacet::dates("f_joined", "joined")
                            .title("Joined")
                            .add_named(Some("now-7d"), None::<String>, "last week"),
                    ),
            )
            .build()
            .unwrap()
    }
}
