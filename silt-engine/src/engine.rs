use std::cell::{Cell};
use std::ptr;
use std::rc::{Rc, Weak};
use fnv::{FnvHashMap};
use tracing::{debug};
use super::alloc::{default_allocf, AllocFn, Allocator};
use super::code::{CallInfo, Irep};
use super::error::{SResult};
use super::gc::{Arena, HeapStats};
use super::heap::{GcBackend, Heap};
use super::obj::{
	Data, DataType, Dict, Env, ErrorObj, Id, ObjKind, ObjRef, Port, Record, Str, Sym, Tt
};
use super::val::{Val};

//-------------------------------------------------------------------------------------------------
// EngineBuilder
//-------------------------------------------------------------------------------------------------

/**
Configures and constructs an [`Engine`](struct.Engine.html).

```ignore
let mut engine = EngineBuilder::new()
	.backend(GcBackend::Bitmap)
	.page_request_ratio(0.75)
	.build();
```
*/

pub struct EngineBuilder {
	backend: GcBackend,
	page_request_ratio: f32,
	gc_stress: bool,
	allocf: AllocFn,
	userdata: *mut ()
}

impl Default for EngineBuilder {
	fn default() -> EngineBuilder {
		EngineBuilder::new()
	}
}

impl EngineBuilder {
	pub fn new() -> EngineBuilder {
		EngineBuilder {
			backend: GcBackend::FreeList,
			page_request_ratio: 7.0 / 8.0,
			gc_stress: false,
			allocf: default_allocf,
			userdata: ptr::null_mut()
		}
	}

	///Selects the page back-end. The default is [`GcBackend::FreeList`](enum.GcBackend.html).
	pub fn backend(mut self, backend: GcBackend) -> EngineBuilder {
		self.backend = backend;
		self
	}

	/**
	Sets the growth threshold: after a sweep which leaves at least this fraction of
	the heap in use, one more page is requested ahead of demand. Clamped to
	`0.5 ..= 1.0`; the default is `7/8`.
	*/
	pub fn page_request_ratio(mut self, ratio: f32) -> EngineBuilder {
		self.page_request_ratio = ratio.clamp(0.5, 1.0);
		self
	}

	///Starts the engine in allocation-stress mode: a full collection before every allocation.
	pub fn gc_stress(mut self, stress: bool) -> EngineBuilder {
		self.gc_stress = stress;
		self
	}

	/**
	Installs a custom allocation callback. Every page, the root arena, and
	[`alloca`](struct.Engine.html#method.alloca) buffers are funded through it.
	*/
	pub fn allocf(mut self, allocf: AllocFn, userdata: *mut ()) -> EngineBuilder {
		self.allocf = allocf;
		self.userdata = userdata;
		self
	}

	pub fn build(self) -> Engine {
		let allocator = Allocator::new(self.allocf, self.userdata);
		let heap = Heap::open(self.backend, &allocator);

		let mut engine = Engine {
			allocator,
			heap,
			arena: Arena::new(),
			oblist: FnvHashMap::default(),
			globals: Val::Nil,
			macros: Val::Nil,
			err: Val::Nil,
			features: Val::Nil,
			ltable: FnvHashMap::default(),
			ireps: Vec::new(),
			stack: Vec::new(),
			ci: Vec::new(),
			cp: None,
			gc_enabled: true,
			gc_stress: self.gc_stress,
			page_request_ratio: self.page_request_ratio,
			stats: HeapStats::default()
		};

		//each of these is stored into its root slot before the next allocation, so no
		//arena protection is needed during bootstrap
		let globals = engine.obj_alloc_unprotected(ObjKind::Dict(Dict::new()));
		engine.globals = Val::Obj(globals);

		let macros = engine.obj_alloc_unprotected(ObjKind::Dict(Dict::new()));
		engine.macros = Val::Obj(macros);

		debug!(target: "silt::engine", backend = ?self.backend, "engine opened");

		engine
	}
}

//-------------------------------------------------------------------------------------------------
// Engine
//-------------------------------------------------------------------------------------------------

/**
A Silt interpreter instance: the object heap and every mutable root the collector
scans.

All state is owned by the instance and passed explicitly; there is no process-wide
singleton, and an `Engine` can neither be sent to nor shared with another thread.
Dropping the engine releases every page without running `data` destructor hooks —
embedders are expected to have torn down live state first.
*/

pub struct Engine {
	pub(crate) allocator: Allocator,
	pub(crate) heap: Heap,
	pub(crate) arena: Arena,

	//the interned-symbol table. deliberately not a root: dead symbols are purged
	//during sweep
	pub(crate) oblist: FnvHashMap<Rc<str>, ObjRef>,

	//root slots read by the collector
	pub(crate) globals: Val,
	pub(crate) macros: Val,
	pub(crate) err: Val,
	pub(crate) features: Val,
	pub(crate) ltable: FnvHashMap<Rc<str>, Library>,
	pub(crate) ireps: Vec<Weak<Irep>>,
	pub(crate) stack: Vec<Val>,
	pub(crate) ci: Vec<CallInfo>,
	pub(crate) cp: Option<ObjRef>,

	pub(crate) gc_enabled: bool,
	pub(crate) gc_stress: bool,
	pub(crate) page_request_ratio: f32,
	pub(crate) stats: HeapStats
}

pub(crate) struct Library {
	pub(crate) name: ObjRef,
	pub(crate) env: ObjRef,
	pub(crate) exports: ObjRef
}

impl Default for Engine {
	fn default() -> Engine {
		Engine::new()
	}
}

impl Drop for Engine {
	fn drop(&mut self) {
		//release every payload in place, then the pages themselves. data dtor hooks are
		//deliberately not run here.
		self.heap.pages.each_object(&mut |obj| unsafe {
			ptr::drop_in_place(obj);
		});
		self.heap.pages.close(&self.allocator);
		self.arena.close(&self.allocator);

		debug!(target: "silt::engine", collections = self.stats.collections, "engine closed");
	}
}

impl Engine {
	///Constructs an engine with the default configuration.
	pub fn new() -> Engine {
		EngineBuilder::new().build()
	}

	pub(crate) fn expect_obj(&self, v: Val, tt: Tt) -> SResult<ObjRef> {
		match v {
			Val::Obj(obj) if obj.get().tt() == tt => Ok(obj),
			_ => Err(error!("expected {}, received {}", tt.a_name(), v.a_type_name()))
		}
	}

	//---------------------------------------------------------------------------------------------
	// symbols
	//---------------------------------------------------------------------------------------------

	/**
	Interns a symbol.

	Repeated calls with the same name return the same object, for as long as that
	object stays reachable. An interned symbol which becomes unreachable is purged
	from the table during the next sweep, and a later `intern` of the same name
	produces a fresh object.
	*/
	pub fn intern(&mut self, name: &str) -> Val {
		if let Some(&sym) = self.oblist.get(name) {
			//the oblist is not a root, so even a pre-existing symbol is protected
			//before it's handed out
			return self.protect(Val::Obj(sym))
		}

		let mark = self.enter();

		let rope: Rc<str> = Rc::from(name);
		let name_obj = self.obj_alloc(ObjKind::Str(Str { rope: Rc::clone(&rope) }));
		let sym = self.obj_alloc(ObjKind::Sym(Sym { name: name_obj }));
		self.oblist.insert(rope, sym);

		self.leave(mark);
		self.protect(Val::Obj(sym))
	}

	pub fn sym_name(&self, sym: Val) -> SResult<Rc<str>> {
		let obj = self.expect_obj(sym, Tt::Sym)?;
		match &obj.get().kind {
			ObjKind::Sym(sym) => {
				match &sym.name.get().kind {
					ObjKind::Str(name) => Ok(Rc::clone(&name.rope)),
					_ => unreachable!()
				}
			}
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// envs and identifiers
	//---------------------------------------------------------------------------------------------

	pub fn make_env(&mut self, up: Option<Val>) -> SResult<Val> {
		let up = match up {
			Some(v) => Some(self.expect_obj(v, Tt::Env)?),
			None => None
		};

		let obj = self.obj_alloc(ObjKind::Env(Env::new(up)));
		Ok(Val::Obj(obj))
	}

	///Binds identifier `key` to symbol `uid` in `env`.
	pub fn env_set(&self, env: Val, key: Val, uid: Val) -> SResult<()> {
		let env = self.expect_obj(env, Tt::Env)?;
		let key = self.expect_ident(key)?;
		let uid = self.expect_obj(uid, Tt::Sym)?;

		match &env.get().kind {
			ObjKind::Env(env) => {
				env.map.borrow_mut().insert(key, uid);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	///Resolves `key` in `env`, searching enclosing environments.
	pub fn env_ref(&self, env: Val, key: Val) -> SResult<Option<Val>> {
		let mut env = self.expect_obj(env, Tt::Env)?;
		let key = self.expect_ident(key)?;

		loop {
			match &env.get().kind {
				ObjKind::Env(e) => {
					if let Some(&uid) = e.map.borrow().get(&key) {
						return Ok(Some(Val::Obj(uid)))
					}
					match e.up {
						Some(up) => env = up,
						None => return Ok(None)
					}
				}
				_ => unreachable!()
			}
		}
	}

	///Allocates an identifier: `base` (a sym or id) renamed into `env`.
	pub fn make_id(&mut self, base: Val, env: Val) -> SResult<Val> {
		let base = self.expect_ident(base)?;
		let env = self.expect_obj(env, Tt::Env)?;

		let obj = self.obj_alloc(ObjKind::Id(Id { base, env }));
		Ok(Val::Obj(obj))
	}

	fn expect_ident(&self, v: Val) -> SResult<ObjRef> {
		match v {
			Val::Obj(obj) if matches!(obj.get().tt(), Tt::Sym | Tt::Id) => Ok(obj),
			_ => Err(error!("expected a sym or an id, received {}", v.a_type_name()))
		}
	}

	//---------------------------------------------------------------------------------------------
	// records, ports, errors
	//---------------------------------------------------------------------------------------------

	pub fn make_record(&mut self, ty: Val, datum: Val) -> Val {
		let obj = self.obj_alloc(ObjKind::Record(Record {
			ty: Cell::new(ty),
			datum: Cell::new(datum)
		}));
		Val::Obj(obj)
	}

	pub fn record_type(&self, record: Val) -> SResult<Val> {
		let obj = self.expect_obj(record, Tt::Record)?;
		match &obj.get().kind {
			ObjKind::Record(record) => Ok(record.ty.get()),
			_ => unreachable!()
		}
	}

	pub fn record_datum(&self, record: Val) -> SResult<Val> {
		let obj = self.expect_obj(record, Tt::Record)?;
		match &obj.get().kind {
			ObjKind::Record(record) => Ok(record.datum.get()),
			_ => unreachable!()
		}
	}

	///Allocates a port wrapping an embedder-owned handle. The handle is neither
	///traced nor finalized.
	pub fn make_port(&mut self, handle: *mut ()) -> Val {
		let obj = self.obj_alloc(ObjKind::Port(Port {
			handle: Cell::new(handle)
		}));
		Val::Obj(obj)
	}

	pub fn port_handle(&self, port: Val) -> SResult<*mut ()> {
		let obj = self.expect_obj(port, Tt::Port)?;
		match &obj.get().kind {
			ObjKind::Port(port) => Ok(port.handle.get()),
			_ => unreachable!()
		}
	}

	///Allocates an error object carrying a type symbol, a message string, and a
	///list of irritants. Its stack slot starts out nil.
	pub fn make_error(&mut self, ty: &str, msg: &str, irrs: Val) -> Val {
		let mark = self.enter();

		let ty = self.intern(ty).unwrap_obj();
		let msg = self.obj_alloc(ObjKind::Str(Str { rope: Rc::from(msg) }));
		let obj = self.obj_alloc(ObjKind::Error(ErrorObj {
			ty,
			msg,
			irrs: Cell::new(irrs),
			stack: Cell::new(Val::Nil)
		}));

		self.leave(mark);
		self.protect(Val::Obj(obj))
	}

	pub fn error_type(&self, error: Val) -> SResult<Val> {
		let obj = self.expect_obj(error, Tt::Error)?;
		match &obj.get().kind {
			ObjKind::Error(error) => Ok(Val::Obj(error.ty)),
			_ => unreachable!()
		}
	}

	pub fn error_irrs(&self, error: Val) -> SResult<Val> {
		let obj = self.expect_obj(error, Tt::Error)?;
		match &obj.get().kind {
			ObjKind::Error(error) => Ok(error.irrs.get()),
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// data objects
	//---------------------------------------------------------------------------------------------

	/**
	Allocates a `data` object: an opaque embedder payload with the given hook table.

	The collector calls `ty.mark` when tracing the object and `ty.dtor` exactly once
	when it dies.
	*/
	pub fn make_data(&mut self, ty: &'static DataType, data: *mut u8) -> Val {
		let obj = self.obj_alloc(ObjKind::Data(Data { ty, data }));
		Val::Obj(obj)
	}

	///Returns the payload of a `data` object, checking that it carries the expected
	///hook table.
	pub fn data_ptr(&self, v: Val, ty: &'static DataType) -> SResult<*mut u8> {
		let obj = self.expect_obj(v, Tt::Data)?;
		match &obj.get().kind {
			ObjKind::Data(data) => {
				ensure!(ptr::eq(data.ty, ty), "expected a data of type {}, received {}",
				        ty.name, data.ty.name);
				Ok(data.data)
			}
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// globals, macros, features, the error slot
	//---------------------------------------------------------------------------------------------

	///The globals dictionary, keyed by symbol.
	pub fn globals(&self) -> Val {
		self.globals
	}

	///The macros dictionary, keyed by symbol.
	pub fn macros(&self) -> Val {
		self.macros
	}

	pub fn global_set(&mut self, name: &str, v: Val) -> SResult<()> {
		let mark = self.enter();
		let sym = self.intern(name);
		let result = self.dict_set(self.globals, sym, v);
		self.leave(mark);
		result
	}

	pub fn global_ref(&mut self, name: &str) -> SResult<Option<Val>> {
		let mark = self.enter();
		let sym = self.intern(name);
		let result = self.dict_ref(self.globals, sym);
		self.leave(mark);
		result
	}

	///Conses a feature symbol onto the features list.
	pub fn add_feature(&mut self, name: &str) {
		let mark = self.enter();
		let sym = self.intern(name);
		let features = self.features;
		self.features = self.cons(sym, features);
		self.leave(mark);
	}

	pub fn features(&self) -> Val {
		self.features
	}

	///Stores a value into the current-error root slot.
	pub fn set_error_value(&mut self, v: Val) {
		self.err = v;
	}

	pub fn error_value(&self) -> Val {
		self.err
	}

	//---------------------------------------------------------------------------------------------
	// libraries
	//---------------------------------------------------------------------------------------------

	/**
	Defines a library: a name string, an empty top-level env, and an empty exports
	dictionary, all rooted by the library table.
	*/
	pub fn define_library(&mut self, name: &str) -> SResult<()> {
		ensure!(!self.ltable.contains_key(name), "library {} is already defined", name);

		let mark = self.enter();

		let name_obj = self.obj_alloc(ObjKind::Str(Str { rope: Rc::from(name) }));
		let env = self.obj_alloc(ObjKind::Env(Env::new(None)));
		let exports = self.obj_alloc(ObjKind::Dict(Dict::new()));

		self.ltable.insert(Rc::from(name), Library {
			name: name_obj,
			env,
			exports
		});

		self.leave(mark);
		Ok(())
	}

	pub fn library_env(&self, name: &str) -> Option<Val> {
		self.ltable.get(name).map(|library| Val::Obj(library.env))
	}

	pub fn library_exports(&self, name: &str) -> Option<Val> {
		self.ltable.get(name).map(|library| Val::Obj(library.exports))
	}

	//---------------------------------------------------------------------------------------------
	// evaluator collaborator slots
	//---------------------------------------------------------------------------------------------

	///Pushes a value onto the operand stack. The whole stack is a root source.
	pub fn stack_push(&mut self, v: Val) {
		self.stack.push(v);
	}

	pub fn stack_pop(&mut self) -> Option<Val> {
		self.stack.pop()
	}

	pub fn stack_len(&self) -> usize {
		self.stack.len()
	}
}
