//! Rendering of decompiled syntax trees as Lua 5.4 source text.

mod lua_emitter;

pub use lua_emitter::{emit_chunk, emit_function, EmitOptions, LuaEmitter};
