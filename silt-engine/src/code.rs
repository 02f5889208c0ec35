use std::cell::{Cell};
use std::rc::{Rc};
use super::engine::{Engine};
use super::error::{SResult};
use super::obj::{Checkpoint, ObjKind, ObjRef, Tt};
use super::val::{Val};

//-------------------------------------------------------------------------------------------------
// payloads
//-------------------------------------------------------------------------------------------------

///The signature of a native function installed into a `func` object.
pub type NativeFn = fn(&mut Engine, &[Val]) -> SResult<Val>;

//a lexical register frame. `up` chains to the enclosing frame, and is traced
//iteratively.
pub(crate) struct Cxt {
	pub(crate) up: Option<ObjRef>,
	pub(crate) regs: Box<[Cell<Val>]>
}

//a native closure: a function pointer plus its captured locals
pub(crate) struct Func {
	pub(crate) f: NativeFn,
	pub(crate) locals: Box<[Cell<Val>]>
}

//a bytecode closure: a shared compiled body plus the frame it closed over
pub(crate) struct Proc {
	pub(crate) irep: Rc<Irep>,
	pub(crate) cxt: Option<ObjRef>
}

/**
A compiled procedure body.

An `Irep` is refcounted outside the heap: `proc` objects hold strong handles, and the
engine's registry holds weak ones. While any handle is live and the irep is
[registered](struct.Engine.html#method.register_irep), the values in its literal `pool`
are roots.
*/

pub struct Irep {
	pub argc: usize,
	pub varg: bool,
	pub code: Box<[u8]>,
	pub pool: Box<[Val]>
}

impl Irep {
	pub fn new(argc: usize, varg: bool, code: Vec<u8>, pool: Vec<Val>) -> Rc<Irep> {
		Rc::new(Irep {
			argc,
			varg,
			code: code.into_boxed_slice(),
			pool: pool.into_boxed_slice()
		})
	}
}

//one frame of the evaluator's call-info stack. the collector only cares about `cxt`.
pub(crate) struct CallInfo {
	pub(crate) argc: i32,
	pub(crate) cxt: Option<ObjRef>
}

//-------------------------------------------------------------------------------------------------
// engine operations
//-------------------------------------------------------------------------------------------------

impl Engine {
	/**
	Allocates a register frame of `regc` registers, each initialized to undef,
	chained to the optional enclosing frame `up`.
	*/
	pub fn make_cxt(&mut self, regc: usize, up: Option<Val>) -> SResult<Val> {
		let up = match up {
			Some(v) => Some(self.expect_obj(v, Tt::Cxt)?),
			None => None
		};

		let regs = vec![Cell::new(Val::Undef); regc].into_boxed_slice();
		let obj = self.obj_alloc(ObjKind::Cxt(Cxt { up, regs }));
		Ok(Val::Obj(obj))
	}

	pub fn cxt_reg(&self, cxt: Val, i: usize) -> SResult<Val> {
		let obj = self.expect_obj(cxt, Tt::Cxt)?;
		match &obj.get().kind {
			ObjKind::Cxt(cxt) => {
				ensure!(i < cxt.regs.len(), "register {} out of bounds for a cxt of {} \
				        registers", i, cxt.regs.len());
				Ok(cxt.regs[i].get())
			}
			_ => unreachable!()
		}
	}

	pub fn cxt_set_reg(&self, cxt: Val, i: usize, v: Val) -> SResult<()> {
		let obj = self.expect_obj(cxt, Tt::Cxt)?;
		match &obj.get().kind {
			ObjKind::Cxt(cxt) => {
				ensure!(i < cxt.regs.len(), "register {} out of bounds for a cxt of {} \
				        registers", i, cxt.regs.len());
				cxt.regs[i].set(v);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	///Allocates a native closure over a copy of `locals`.
	pub fn make_func(&mut self, f: NativeFn, locals: &[Val]) -> Val {
		let locals: Box<[Cell<Val>]> = locals.iter().map(|&v| Cell::new(v)).collect();
		let obj = self.obj_alloc(ObjKind::Func(Func { f, locals }));
		Val::Obj(obj)
	}

	pub fn func_local(&self, func: Val, i: usize) -> SResult<Val> {
		let obj = self.expect_obj(func, Tt::Func)?;
		match &obj.get().kind {
			ObjKind::Func(func) => {
				ensure!(i < func.locals.len(), "local {} out of bounds for a func of {} \
				        locals", i, func.locals.len());
				Ok(func.locals[i].get())
			}
			_ => unreachable!()
		}
	}

	/**
	Adds an irep to the engine's registry, making its literal pool a root source.

	The registry holds a weak handle; the entry is pruned once no live `proc` or
	embedder handle refers to the irep.
	*/
	pub fn register_irep(&mut self, irep: &Rc<Irep>) {
		self.ireps.push(Rc::downgrade(irep));
	}

	///Allocates a bytecode closure over `irep` and an optional register frame.
	pub fn make_proc(&mut self, irep: &Rc<Irep>, cxt: Option<Val>) -> SResult<Val> {
		let cxt = match cxt {
			Some(v) => Some(self.expect_obj(v, Tt::Cxt)?),
			None => None
		};

		let obj = self.obj_alloc(ObjKind::Irep(Proc {
			irep: Rc::clone(irep),
			cxt
		}));
		Ok(Val::Obj(obj))
	}

	///Pushes a call frame. The frame's register context, if any, becomes a root.
	pub fn ci_push(&mut self, argc: i32, cxt: Option<Val>) -> SResult<()> {
		let cxt = match cxt {
			Some(v) => Some(self.expect_obj(v, Tt::Cxt)?),
			None => None
		};

		self.ci.push(CallInfo { argc, cxt });
		Ok(())
	}

	pub fn ci_pop(&mut self) -> Option<i32> {
		self.ci.pop().map(|ci| ci.argc)
	}

	pub fn ci_depth(&self) -> usize {
		self.ci.len()
	}

	/**
	Pushes a dynamic-wind checkpoint. `before` and `after` must be procs (`func` or
	`irep` objects); the new checkpoint chains to the current one and becomes the
	root of the chain.
	*/
	pub fn push_checkpoint(&mut self, before: Option<Val>, after: Option<Val>) -> SResult<()> {
		let before = match before {
			Some(v) => Some(self.expect_proc(v)?),
			None => None
		};
		let after = match after {
			Some(v) => Some(self.expect_proc(v)?),
			None => None
		};

		let cp = self.obj_alloc_unprotected(ObjKind::Checkpoint(Checkpoint {
			prev: self.cp,
			before,
			after
		}));
		self.cp = Some(cp);
		Ok(())
	}

	pub fn pop_checkpoint(&mut self) -> SResult<()> {
		match self.cp {
			Some(cp) => {
				match &cp.get().kind {
					ObjKind::Checkpoint(checkpoint) => {
						self.cp = checkpoint.prev;
						Ok(())
					}
					_ => unreachable!()
				}
			}
			None => bail!("pop_checkpoint() with no checkpoint in effect")
		}
	}

	///The current dynamic-wind checkpoint, if any.
	pub fn checkpoint(&self) -> Option<Val> {
		self.cp.map(Val::Obj)
	}

	pub(crate) fn expect_proc(&self, v: Val) -> SResult<ObjRef> {
		match v {
			Val::Obj(obj) if matches!(obj.get().tt(), Tt::Func | Tt::Irep) => Ok(obj),
			_ => Err(error!("expected a proc, received {}", v.a_type_name()))
		}
	}
}
