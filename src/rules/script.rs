use crate::error::{Result, TransferError};
use crate::model::{ColumnValue, RowImage};
use mlua::{Lua, RegistryKey, Value as LuaValue};
use parking_lot::Mutex;
use std::path::Path;

/// A user-supplied row transform, precompiled once at rule-init time and
/// retained as a compiled `mlua::Function` for the life of the Rule. Scripts
/// reference logical column names, not physical metadata, so recompilation
/// never happens on DDL.
///
/// `mlua::Function` borrows from the `Lua` VM that created it, so it can't be
/// stored directly on a struct shared across tasks. Instead the compiled
/// chunk is stashed in the VM's registry via `create_registry_value`, and
/// `transform` re-fetches the `Function` handle from the registry on each
/// call — no re-parsing, no re-running the script's top level, just a lookup.
/// The `Lua` instance itself is single-threaded, so it sits behind a `Mutex`
/// to give the wrapper `Send + Sync`.
pub struct CompiledScript {
    lua: Mutex<Lua>,
    transform_key: RegistryKey,
    source_len: usize,
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("source_len", &self.source_len)
            .finish()
    }
}

impl CompiledScript {
    /// Loads, runs the script's top level once, and registers its
    /// `transform(before, after) -> table` entry point. Running the top
    /// level here (rather than deferring it to the first row) means a script
    /// with a syntax or load-time error fails at rule-init, not on the first
    /// row event.
    pub fn precompile(data_dir: &Path, script_path: &str) -> Result<Self> {
        let full_path = data_dir.join(script_path);
        let source = std::fs::read_to_string(&full_path).map_err(|e| {
            TransferError::RuleCompileFailed {
                schema: String::new(),
                table: String::new(),
                source: format!("reading {}: {e}", full_path.display()),
            }
        })?;

        let lua = Lua::new();
        lua.load(&source).exec().map_err(|e| TransferError::RuleCompileFailed {
            schema: String::new(),
            table: String::new(),
            source: format!("loading {}: {e}", full_path.display()),
        })?;

        let transform: mlua::Function = lua.globals().get("transform").map_err(|e| {
            TransferError::RuleCompileFailed {
                schema: String::new(),
                table: String::new(),
                source: format!("script has no `transform` function: {e}"),
            }
        })?;

        let transform_key = lua.create_registry_value(transform).map_err(|e| {
            TransferError::RuleCompileFailed {
                schema: String::new(),
                table: String::new(),
                source: format!("registering transform function: {e}"),
            }
        })?;

        Ok(Self {
            lua: Mutex::new(lua),
            transform_key,
            source_len: source.len(),
        })
    }

    /// Runs the already-compiled `transform` entry point against one row
    /// image pair, returning zero or more output rows.
    pub fn transform(
        &self,
        before: Option<&RowImage>,
        after: Option<&RowImage>,
    ) -> Result<Vec<RowImage>> {
        let lua = self.lua.lock();

        let transform: mlua::Function = lua.registry_value(&self.transform_key).map_err(|e| {
            TransferError::RuleCompileFailed {
                schema: String::new(),
                table: String::new(),
                source: format!("fetching compiled transform: {e}"),
            }
        })?;

        let lua_before = row_image_to_lua(&lua, before)?;
        let lua_after = row_image_to_lua(&lua, after)?;

        let result: LuaValue = transform
            .call((lua_before, lua_after))
            .map_err(|e| TransferError::RuleCompileFailed {
                schema: String::new(),
                table: String::new(),
                source: format!("running transform: {e}"),
            })?;

        lua_value_to_rows(result)
    }
}

fn row_image_to_lua(lua: &Lua, row: Option<&RowImage>) -> Result<LuaValue> {
    let Some(row) = row else {
        return Ok(LuaValue::Nil);
    };
    let table = lua.create_table().map_err(lua_err)?;
    for (key, value) in row {
        table.set(key.clone(), value.as_text_lossy()).map_err(lua_err)?;
    }
    Ok(LuaValue::Table(table))
}

fn lua_value_to_rows(value: LuaValue) -> Result<Vec<RowImage>> {
    let LuaValue::Table(outer) = value else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for pair in outer.sequence_values::<mlua::Table>() {
        let row_table = pair.map_err(lua_err)?;
        let mut row = RowImage::new();
        for entry in row_table.pairs::<String, String>() {
            let (k, v) = entry.map_err(lua_err)?;
            row.insert(k, ColumnValue::Text(v));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn lua_err(e: mlua::Error) -> TransferError {
    TransferError::RuleCompileFailed {
        schema: String::new(),
        table: String::new(),
        source: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn reuses_compiled_function_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "upper.lua",
            r#"
            calls = 0
            function transform(before, after)
                calls = calls + 1
                return { { call_count = tostring(calls) } }
            end
            "#,
        );

        let script = CompiledScript::precompile(dir.path(), "upper.lua").unwrap();

        let first = script.transform(None, None).unwrap();
        let second = script.transform(None, None).unwrap();

        assert_eq!(first[0].get("call_count").unwrap().as_text_lossy(), "1");
        assert_eq!(second[0].get("call_count").unwrap().as_text_lossy(), "2");
    }

    #[test]
    fn rejects_script_without_transform_function() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "broken.lua", "x = 1");

        assert!(CompiledScript::precompile(dir.path(), "broken.lua").is_err());
    }
}
