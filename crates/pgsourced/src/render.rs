//! `pgsourced render` — print the DDL a pipeline would apply.

use anyhow::Context;

use pgsource_core::naming;
use pgsource_schema::sql;

/// Function DDL followed by one trigger per table, in the order a reconcile
/// run would execute them.
pub fn render_ddl(name: &str, uid: &str, tables: &[String]) -> anyhow::Result<String> {
    let pg_name = naming::postgres_name(name, uid);
    let mut out = format!("-- channel: {pg_name}\n");
    out.push_str(&sql::create_function(&pg_name).context("rendering function")?);
    for table in tables {
        out.push_str(
            &sql::create_trigger(&pg_name, table)
                .with_context(|| format!("rendering trigger for table {table:?}"))?,
        );
    }
    Ok(out)
}
