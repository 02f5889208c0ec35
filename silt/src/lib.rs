/*!
The [Silt](https://github.com/silt-lang/silt) scripting language.

This crate re-exports the public API of `silt-engine`.
*/

pub use silt_engine::*;

pub mod prelude {
	/*!
	The prelude.
	*/

	#[doc(no_inline)]
	pub use crate::{
		bail, ensure, error,

		AllocFn, Allocator, ArenaMark,
		DataType,
		Engine, EngineBuilder,
		GcBackend,
		HeapStats,
		Irep,
		Key,
		Marker,
		NativeFn,
		ObjRef,
		SError, SResult,
		Tt,
		Val,
	};
}
