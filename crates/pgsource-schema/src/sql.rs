//! DDL templates and catalog queries.
//!
//! The templates are parameterized only by the pipeline's generated name
//! (which doubles as the NOTIFY channel) and, for triggers, the table name.
//! DDL identifiers cannot be bound as query parameters, so both are checked
//! against the safe identifier pattern before interpolation.

use pgsource_core::naming::is_valid_identifier;

use crate::error::{SchemaError, SchemaResult};

/// Base tables in user schemas with the given name.
pub const TABLE_QUERY: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_type = 'BASE TABLE' \
     AND table_schema NOT IN ('pg_catalog', 'information_schema') \
     AND table_name = $1";

/// Triggers with the given name on the given table, one row per firing event.
pub const TRIGGERS_QUERY: &str = "SELECT trigger_name::text, event_manipulation::text, event_object_table::text \
     FROM information_schema.triggers \
     WHERE event_object_table = $1 AND trigger_name = $2";

/// Tables carrying a trigger with the given name.
pub const TRIGGER_TABLES_QUERY: &str = "SELECT DISTINCT event_object_table::text \
     FROM information_schema.triggers \
     WHERE trigger_name = $1 ORDER BY 1";

/// Functions with the given name.
pub const FUNCTION_QUERY: &str = "SELECT routine_name::text FROM information_schema.routines \
     WHERE routine_type = 'FUNCTION' AND routine_name = $1";

const FUNCTION_TEMPLATE: &[&str] = &[
    "",
    "CREATE OR REPLACE FUNCTION {name}() RETURNS TRIGGER AS $$",
    "",
    "    DECLARE ",
    "        data json;",
    "        notification json;",
    "    ",
    "    BEGIN",
    "    ",
    "        -- Convert the old or new row to JSON, based on the kind of action.",
    "        -- Action = DELETE?             -> OLD row",
    "        -- Action = INSERT or UPDATE?   -> NEW row",
    "        IF (TG_OP = 'DELETE') THEN",
    "            data = row_to_json(OLD);",
    "        ELSE",
    "            data = row_to_json(NEW);",
    "        END IF;",
    "        ",
    "        -- Contruct the notification as a JSON string.",
    "        notification = json_build_object(",
    "                          'table',TG_TABLE_NAME,",
    "                          'action', TG_OP,",
    "                          'data', data);",
    "        ",
    "                        ",
    "        -- Execute pg_notify(channel, notification)",
    "        PERFORM pg_notify('{name}',notification::text);",
    "        ",
    "        -- Result is ignored since this is an AFTER trigger",
    "        RETURN NULL; ",
    "    END;",
    "    ",
    "$$ LANGUAGE plpgsql;",
    "",
];

const TRIGGER_TEMPLATE: &[&str] = &[
    "",
    "CREATE TRIGGER {name}",
    "AFTER INSERT OR UPDATE OR DELETE ON {table}",
    "    FOR EACH ROW EXECUTE PROCEDURE {name}();",
    "",
];

fn checked(ident: &str) -> SchemaResult<&str> {
    if is_valid_identifier(ident) {
        Ok(ident)
    } else {
        Err(SchemaError::InvalidIdentifier(ident.to_string()))
    }
}

/// `CREATE OR REPLACE FUNCTION` for the notify function named `name`.
///
/// The function publishes `{table, action, data}` as JSON on channel `name`.
pub fn create_function(name: &str) -> SchemaResult<String> {
    let name = checked(name)?;
    Ok(FUNCTION_TEMPLATE.join("\n").replace("{name}", name))
}

/// `CREATE TRIGGER` firing the notify function after every row change on `table`.
pub fn create_trigger(name: &str, table: &str) -> SchemaResult<String> {
    let name = checked(name)?;
    let table = checked(table)?;
    Ok(TRIGGER_TEMPLATE
        .join("\n")
        .replace("{name}", name)
        .replace("{table}", table))
}

pub fn drop_trigger(name: &str, table: &str) -> SchemaResult<String> {
    let name = checked(name)?;
    let table = checked(table)?;
    Ok(format!("DROP TRIGGER IF EXISTS {name} ON {table};"))
}

pub fn drop_function(name: &str) -> SchemaResult<String> {
    let name = checked(name)?;
    Ok(format!("DROP FUNCTION IF EXISTS {name}();"))
}
