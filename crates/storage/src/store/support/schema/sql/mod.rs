#![forbid(unsafe_code)]

mod core;
mod leases;
mod runs;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(core::SQL);
    sql.push_str(leases::SQL);
    sql.push_str(runs::SQL);
    sql
}
