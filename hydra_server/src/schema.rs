//! Diesel table definitions.
//!
//! One table, `hydra_submissions`, one row per submitted repository/branch.

diesel::table! {
    hydra_submissions (id) {
        id -> Int8,
        repository -> Varchar,
        branch -> Varchar,
        status -> Varchar,
        port -> Nullable<Int4>,
        generation -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
