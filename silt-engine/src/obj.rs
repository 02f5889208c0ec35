use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::ptr::{NonNull};
use std::rc::{Rc};
use fnv::{FnvHashMap};
use super::alloc::{Allocator};
use super::code::{Cxt, Func, Proc};
use super::gc::{Marker};
use super::val::{Key, Val};

//-------------------------------------------------------------------------------------------------
// ObjRef
//-------------------------------------------------------------------------------------------------

/**
A reference to an object cell on the garbage-collected heap.

`ObjRef` is a bare pointer with identity semantics: it implements `Eq` and `Hash` by
address, without dereferencing. It does not root the object it points to. A live `ObjRef`
must be reachable from one of the collector's root sources before the next safe point,
or it will dangle; see [`Engine::protect`](struct.Engine.html#method.protect).
*/

#[derive(Clone, Copy)]
pub struct ObjRef(pub(crate) NonNull<Obj>);

impl ObjRef {
	//the returned borrow is unbounded. every call site either holds the engine alive for
	//the duration, or (as in Val::same) never materialises the reference at all.
	#[inline]
	pub(crate) fn get<'a>(self) -> &'a Obj {
		unsafe {
			&*self.0.as_ptr()
		}
	}

	#[inline]
	pub(crate) fn as_ptr(self) -> *mut Obj {
		self.0.as_ptr()
	}

	#[inline]
	pub(crate) fn as_usize(self) -> usize {
		self.0.as_ptr() as usize
	}

	pub fn ptr_eq(r0: ObjRef, r1: ObjRef) -> bool {
		r0.0 == r1.0
	}
}

impl PartialEq<ObjRef> for ObjRef {
	fn eq(&self, other: &ObjRef) -> bool {
		self.0 == other.0
	}
}

impl Eq for ObjRef { }

impl Hash for ObjRef {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.as_usize().hash(state)
	}
}

impl Debug for ObjRef {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "ObjRef(0x{:x})", self.as_usize())
	}
}

//-------------------------------------------------------------------------------------------------
// Obj
//-------------------------------------------------------------------------------------------------

//the mark color, stored in the object header. only the free-list back-end reads it; the
//bitmap back-end keeps its mark bits in a side array per page.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
	White,
	Black
}

//an object cell: a one-word header followed by the variant payload. the variant never
//changes after allocation.
pub(crate) struct Obj {
	pub(crate) color: Cell<Color>,
	pub(crate) kind: ObjKind
}

impl Obj {
	pub(crate) fn new(kind: ObjKind) -> Obj {
		Obj {
			color: Cell::new(Color::White),
			kind
		}
	}

	pub(crate) fn tt(&self) -> Tt {
		match self.kind {
			ObjKind::Pair(_) => Tt::Pair,
			ObjKind::Vector(_) => Tt::Vector,
			ObjKind::Blob(_) => Tt::Blob,
			ObjKind::Str(_) => Tt::Str,
			ObjKind::Dict(_) => Tt::Dict,
			ObjKind::Weak(_) => Tt::Weak,
			ObjKind::Env(_) => Tt::Env,
			ObjKind::Id(_) => Tt::Id,
			ObjKind::Sym(_) => Tt::Sym,
			ObjKind::Record(_) => Tt::Record,
			ObjKind::Data(_) => Tt::Data,
			ObjKind::Cxt(_) => Tt::Cxt,
			ObjKind::Func(_) => Tt::Func,
			ObjKind::Irep(_) => Tt::Irep,
			ObjKind::Port(_) => Tt::Port,
			ObjKind::Error(_) => Tt::Error,
			ObjKind::Checkpoint(_) => Tt::Checkpoint
		}
	}
}

/**
The type tag of a heap object.

A tag is assigned when the object is allocated and never changes.
*/

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Tt {
	Pair,
	Vector,
	Blob,
	Str,
	Dict,
	Weak,
	Env,
	Id,
	Sym,
	Record,
	Data,
	Cxt,
	Func,
	Irep,
	Port,
	Error,
	Checkpoint
}

impl Tt {
	pub fn name(self) -> &'static str {
		match self {
			Tt::Pair => "pair",
			Tt::Vector => "vector",
			Tt::Blob => "blob",
			Tt::Str => "str",
			Tt::Dict => "dict",
			Tt::Weak => "weak",
			Tt::Env => "env",
			Tt::Id => "id",
			Tt::Sym => "sym",
			Tt::Record => "record",
			Tt::Data => "data",
			Tt::Cxt => "cxt",
			Tt::Func => "func",
			Tt::Irep => "irep",
			Tt::Port => "port",
			Tt::Error => "error",
			Tt::Checkpoint => "checkpoint"
		}
	}

	pub fn a_name(self) -> &'static str {
		match self {
			Tt::Pair => "a pair",
			Tt::Vector => "a vector",
			Tt::Blob => "a blob",
			Tt::Str => "a str",
			Tt::Dict => "a dict",
			Tt::Weak => "a weak",
			Tt::Env => "an env",
			Tt::Id => "an id",
			Tt::Sym => "a sym",
			Tt::Record => "a record",
			Tt::Data => "a data",
			Tt::Cxt => "a cxt",
			Tt::Func => "a func",
			Tt::Irep => "an irep",
			Tt::Port => "a port",
			Tt::Error => "an error",
			Tt::Checkpoint => "a checkpoint"
		}
	}
}

//-------------------------------------------------------------------------------------------------
// ObjKind and payloads
//-------------------------------------------------------------------------------------------------

//the variant payloads. mutation happens through shared references, so every field which
//the mutator may rewrite is a Cell or RefCell. each payload uniquely owns its secondary
//storage (boxes, tables, rope handles); dropping the payload in place releases it.
pub(crate) enum ObjKind {
	Pair(Pair),
	Vector(Vector),
	Blob(Blob),
	Str(Str),
	Dict(Dict),
	Weak(WeakMap),
	Env(Env),
	Id(Id),
	Sym(Sym),
	Record(Record),
	Data(Data),
	Cxt(Cxt),
	Func(Func),
	Irep(Proc),
	Port(Port),
	Error(ErrorObj),
	Checkpoint(Checkpoint)
}

pub(crate) struct Pair {
	pub(crate) car: Cell<Val>,
	pub(crate) cdr: Cell<Val>
}

pub(crate) struct Vector {
	pub(crate) data: Box<[Cell<Val>]>
}

pub(crate) struct Blob {
	pub(crate) data: Box<[u8]>
}

//the rope is shared between this object, its oblist entry when it names an interned
//symbol, and any other string built from the same text. the last handle frees it.
pub(crate) struct Str {
	pub(crate) rope: Rc<str>
}

pub(crate) struct Dict {
	pub(crate) map: RefCell<FnvHashMap<Key, Val>>
}

impl Dict {
	pub(crate) fn new() -> Dict {
		Dict {
			map: RefCell::new(FnvHashMap::default())
		}
	}
}

//`prev` is only meaningful while a collection is in progress: the mark phase links every
//reachable weak map into a chain through it, and the sweep phase unlinks the chain.
pub(crate) struct WeakMap {
	pub(crate) map: RefCell<FnvHashMap<ObjRef, Val>>,
	pub(crate) prev: Cell<Option<ObjRef>>
}

impl WeakMap {
	pub(crate) fn new() -> WeakMap {
		WeakMap {
			map: RefCell::new(FnvHashMap::default()),
			prev: Cell::new(None)
		}
	}
}

pub(crate) struct Env {
	pub(crate) map: RefCell<FnvHashMap<ObjRef, ObjRef>>,
	pub(crate) up: Option<ObjRef>
}

impl Env {
	pub(crate) fn new(up: Option<ObjRef>) -> Env {
		Env {
			map: RefCell::new(FnvHashMap::default()),
			up
		}
	}
}

//an identifier: a symbol renamed into a lexical environment
pub(crate) struct Id {
	pub(crate) base: ObjRef,
	pub(crate) env: ObjRef
}

pub(crate) struct Sym {
	pub(crate) name: ObjRef
}

pub(crate) struct Record {
	pub(crate) ty: Cell<Val>,
	pub(crate) datum: Cell<Val>
}

pub(crate) struct Data {
	pub(crate) ty: &'static DataType,
	pub(crate) data: *mut u8
}

//host port state; the embedder owns it outright, so the collector neither traces nor
//finalizes it
pub(crate) struct Port {
	pub(crate) handle: Cell<*mut ()>
}

pub(crate) struct ErrorObj {
	pub(crate) ty: ObjRef,
	pub(crate) msg: ObjRef,
	pub(crate) irrs: Cell<Val>,
	pub(crate) stack: Cell<Val>
}

//a dynamic-wind record. `before` and `after` are procs; `after` chains are traced
//iteratively, because unwinding can stack them arbitrarily deep.
pub(crate) struct Checkpoint {
	pub(crate) prev: Option<ObjRef>,
	pub(crate) before: Option<ObjRef>,
	pub(crate) after: Option<ObjRef>
}

//-------------------------------------------------------------------------------------------------
// DataType
//-------------------------------------------------------------------------------------------------

/**
The hook table for a `data` object: an opaque embedder payload with collector callbacks.

`mark` is invoked during tracing; it must call [`Marker::mark`](struct.Marker.html) once
for every value the payload owns, and must do nothing else. `dtor` is invoked exactly once
when the object is finalized; it may free unrelated memory through the supplied
[`Allocator`](struct.Allocator.html), but must not allocate heap objects or mark. Neither
hook is invoked when the engine itself is dropped.

`size` is advisory: the payload's footprint outside the heap, for embedders that account
for external memory.
*/

pub struct DataType {
	pub name: &'static str,
	pub size: usize,
	pub mark: Option<fn(*mut u8, &mut Marker)>,
	pub dtor: Option<fn(&Allocator, *mut u8)>
}

impl Debug for DataType {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "DataType({:?})", self.name)
	}
}
