use super::{check_string, Library};
use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::LuaValue;

pub(super) fn library() -> Library {
    Library::new().function("require", lua_require)
}

fn lua_require(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let name = check_string(&args, 0, "require")?;
    lua.require(&name).map(|v| vec![v])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryResources;
    use crate::testing::{global, toy_compile};

    #[test]
    fn require_from_scripts_shares_the_cache() {
        let mut lua = LuaState::new();
        lua.set_compiler(toy_compile);
        lua.globals().write().set_str("hits", 0i64.into());
        lua.package_mut()
            .set_resource_finder(MemoryResources::new().with("counter.lua", "count hits"));

        let require = global(&lua, "require");
        let first = lua.call(&require, vec!["counter".into()]).unwrap();
        let second = lua.call(&require, vec!["counter".into()]).unwrap();
        assert_eq!(first, second);
        assert_eq!(lua.require("counter").unwrap(), first[0]);
        assert_eq!(global(&lua, "hits"), LuaValue::Integer(1));
    }

    #[test]
    fn require_needs_a_name() {
        let mut lua = LuaState::new();
        let require = global(&lua, "require");
        let err = lua.call(&require, vec![]).unwrap_err();
        assert_eq!(err.to_string(), "bad argument #1 to 'require' (string expected, got no value)");
    }

    #[test]
    fn missing_modules_are_catchable() {
        let mut lua = LuaState::new();
        let (pcall, require) = (global(&lua, "pcall"), global(&lua, "require"));
        let out = lua.call(&pcall, vec![require, "nowhere".into()]).unwrap();
        assert_eq!(out[0], LuaValue::Boolean(false));
        assert!(out[1].to_string().starts_with("module 'nowhere' not found:"));
    }
}
