/*!
The core of the [Silt](https://github.com/silt-lang/silt) scripting language: a
garbage-collected object heap for an embedded Scheme-like interpreter.

The centrepiece is [`Engine`](struct.Engine.html), which owns the heap, the root
registry, and every mutable root the collector scans. The collector is a synchronous
tracing mark-and-sweep with two interchangeable page back-ends (a classical free list
and a bitmap variant), ephemeron-style weak maps, and an explicit shadow stack for
embedder roots ([`protect`](struct.Engine.html#method.protect) /
[`enter`](struct.Engine.html#method.enter) / [`leave`](struct.Engine.html#method.leave)).
*/

#[macro_use]
mod error;

mod alloc;
mod code;
mod collections;
mod engine;
mod gc;
mod heap;
mod obj;
mod val;

pub use self::{
	alloc::{default_allocf, AllocFn, Allocator},
	code::{Irep, NativeFn},
	engine::{Engine, EngineBuilder},
	error::{SError, SResult},
	gc::{ArenaMark, HeapStats, Marker},
	heap::{GcBackend},
	obj::{DataType, ObjRef, Tt},
	val::{Key, Val},
};
