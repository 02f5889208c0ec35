use std::mem::{size_of};
use std::ptr;
use smallvec::{SmallVec};
use tracing::{debug};
use super::alloc::{Allocator};
use super::engine::{Engine};
use super::heap::{Heap};
use super::obj::{DataType, Obj, ObjKind, ObjRef};
use super::val::{Val};

//-------------------------------------------------------------------------------------------------
// the root arena
//-------------------------------------------------------------------------------------------------

//the explicit shadow stack of protected objects. it's a raw array funded by the embedder's
//allocation callback, growing by doubling (2n+1) when it overflows.
pub(crate) struct Arena {
	buf: *mut ObjRef,
	len: usize,
	cap: usize
}

impl Arena {
	pub(crate) fn new() -> Arena {
		Arena {
			buf: ptr::null_mut(),
			len: 0,
			cap: 0
		}
	}

	pub(crate) fn push(&mut self, obj: ObjRef, allocator: &Allocator) {
		if self.len >= self.cap {
			self.cap = self.cap * 2 + 1;
			let bytes = self.cap * size_of::<ObjRef>();
			self.buf = allocator.realloc(self.buf as *mut u8, bytes) as *mut ObjRef;
		}

		unsafe {
			*self.buf.add(self.len) = obj;
		}
		self.len += 1;
	}

	pub(crate) fn get(&self, i: usize) -> ObjRef {
		debug_assert!(i < self.len);
		unsafe {
			*self.buf.add(i)
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.len
	}

	pub(crate) fn truncate(&mut self, len: usize) {
		debug_assert!(len <= self.len, "leave() with a mark that was never returned by enter()");
		if len <= self.len {
			self.len = len;
		}
	}

	pub(crate) fn close(&mut self, allocator: &Allocator) {
		allocator.free(self.buf as *mut u8);
		self.buf = ptr::null_mut();
		self.len = 0;
		self.cap = 0;
	}
}

/**
A saved position in the root arena, returned by [`Engine::enter`](struct.Engine.html#method.enter).

Marks form a LIFO stack: each mark must be passed to
[`leave`](struct.Engine.html#method.leave) before any mark taken earlier.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArenaMark(pub(crate) usize);

//-------------------------------------------------------------------------------------------------
// marking
//-------------------------------------------------------------------------------------------------

/**
The tracing callback handed to a [`DataType`](struct.DataType.html)'s `mark` hook.

The hook must call [`mark`](#method.mark) once for every value its payload owns, and
must not do anything else with the engine.
*/

pub struct Marker {
	heap: *mut Heap
}

impl Marker {
	pub fn mark(&mut self, v: Val) {
		unsafe {
			mark_value(&mut *self.heap, v);
		}
	}
}

#[inline]
pub(crate) fn mark_value(heap: &mut Heap, v: Val) {
	if let Val::Obj(obj) = v {
		mark_object(heap, obj);
	}
}

//trace one object and everything reachable from it. the match arms which end by
//reassigning `obj` and continuing are the chains that can grow without bound (list
//cdrs, cxt and env parents, error stacks, checkpoint unwinding); they must iterate
//rather than recurse.
pub(crate) fn mark_object(heap: &mut Heap, mut obj: ObjRef) {
	loop {
		if heap.is_marked(obj) {
			return
		}
		heap.mark(obj);

		match &obj.get().kind {
			ObjKind::Pair(pair) => {
				mark_value(heap, pair.car.get());
				if let Val::Obj(cdr) = pair.cdr.get() {
					obj = cdr;
					continue
				}
			}

			ObjKind::Vector(vector) => {
				for slot in vector.data.iter() {
					mark_value(heap, slot.get());
				}
			}

			//no outgoing heap edges
			ObjKind::Blob(_) | ObjKind::Str(_) | ObjKind::Port(_) => (),

			ObjKind::Dict(dict) => {
				for (key, &value) in dict.map.borrow().iter() {
					mark_value(heap, key.0);
					mark_value(heap, value);
				}
			}

			//weak maps are not traced here. they're pushed onto the heap's transient
			//chain, and the fixed-point loop after the root pass decides which of
			//their values are live.
			ObjKind::Weak(weak) => {
				weak.prev.set(heap.weaks);
				heap.weaks = Some(obj);
			}

			ObjKind::Env(env) => {
				for (&key, &value) in env.map.borrow().iter() {
					mark_object(heap, key);
					mark_object(heap, value);
				}
				if let Some(up) = env.up {
					obj = up;
					continue
				}
			}

			ObjKind::Id(id) => {
				mark_object(heap, id.base);
				obj = id.env;
				continue
			}

			ObjKind::Sym(sym) => {
				obj = sym.name;
				continue
			}

			ObjKind::Record(record) => {
				mark_value(heap, record.ty.get());
				if let Val::Obj(datum) = record.datum.get() {
					obj = datum;
					continue
				}
			}

			ObjKind::Data(data) => {
				if let Some(mark) = data.ty.mark {
					let mut marker = Marker {
						heap: heap as *mut Heap
					};
					mark(data.data, &mut marker);
				}
			}

			ObjKind::Cxt(cxt) => {
				for reg in cxt.regs.iter() {
					mark_value(heap, reg.get());
				}
				if let Some(up) = cxt.up {
					obj = up;
					continue
				}
			}

			ObjKind::Func(func) => {
				for local in func.locals.iter() {
					mark_value(heap, local.get());
				}
			}

			ObjKind::Irep(proc) => {
				if let Some(cxt) = proc.cxt {
					obj = cxt;
					continue
				}
			}

			ObjKind::Error(error) => {
				mark_object(heap, error.ty);
				mark_object(heap, error.msg);
				mark_value(heap, error.irrs.get());
				if let Val::Obj(stack) = error.stack.get() {
					obj = stack;
					continue
				}
			}

			ObjKind::Checkpoint(checkpoint) => {
				if let Some(prev) = checkpoint.prev {
					mark_object(heap, prev);
				}
				if let Some(before) = checkpoint.before {
					mark_object(heap, before);
				}
				if let Some(after) = checkpoint.after {
					obj = after;
					continue
				}
			}
		}

		return
	}
}

//-------------------------------------------------------------------------------------------------
// finalization
//-------------------------------------------------------------------------------------------------

//run exactly once per dead object, in whatever order the sweep encounters them. the
//data dtor hook fires first, then dropping the payload in place releases its secondary
//storage (vector and blob boxes, rope handles, hash tables, irep refcounts). neither
//step may allocate or call back into tracing.
pub(crate) fn finalize_object(allocator: &Allocator, obj: *mut Obj) {
	unsafe {
		if let ObjKind::Data(data) = &(*obj).kind {
			if let Some(dtor) = data.ty.dtor {
				dtor(allocator, data.data);
			}
		}
		ptr::drop_in_place(obj);
	}
}

//-------------------------------------------------------------------------------------------------
// stats
//-------------------------------------------------------------------------------------------------

/**
A snapshot of the heap, as returned by [`Engine::heap_stats`](struct.Engine.html#method.heap_stats).

`inuse_units` and `total_units` reflect the most recent sweep.
*/

#[derive(Clone, Copy, Debug, Default)]
pub struct HeapStats {
	pub pages: usize,
	pub total_units: usize,
	pub inuse_units: usize,
	pub collections: u64,
	pub finalized: u64
}

//-------------------------------------------------------------------------------------------------
// GC entry points
//-------------------------------------------------------------------------------------------------

fn alloca_dtor(allocator: &Allocator, data: *mut u8) {
	allocator.free(data);
}

static ALLOCA_TYPE: DataType = DataType {
	name: "alloca",
	size: 0,
	mark: None,
	dtor: Some(alloca_dtor)
};

impl Engine {
	/**
	Pushes a value onto the root arena, shielding it from the collector until the
	enclosing [`enter`](#method.enter)/[`leave`](#method.leave) scope is popped.

	Immediates are returned unchanged.
	*/
	pub fn protect(&mut self, v: Val) -> Val {
		if let Val::Obj(obj) = v {
			self.arena.push(obj, &self.allocator);
		}
		v
	}

	///Returns the current arena position. `leave(enter())` is a no-op.
	pub fn enter(&mut self) -> ArenaMark {
		ArenaMark(self.arena.len())
	}

	///Pops every value protected since the matching [`enter`](#method.enter).
	pub fn leave(&mut self, mark: ArenaMark) {
		self.arena.truncate(mark.0);
	}

	/**
	Runs a full mark-and-sweep collection.

	Does nothing while collection is disabled. Every object unreachable from the root
	sources is finalized exactly once and its cell reclaimed; weak-map entries with
	dead keys and oblist entries for dead symbols are purged first.
	*/
	pub fn collect(&mut self) {
		if !self.gc_enabled {
			return
		}

		debug_assert!(self.heap.weaks.is_none());

		self.mark_phase();
		self.sweep_phase();

		self.stats.collections += 1;
		debug!(
			target: "silt::gc",
			collections = self.stats.collections,
			pages = self.heap.pages.page_count(),
			inuse_units = self.stats.inuse_units,
			total_units = self.stats.total_units,
			"collection complete"
		);
	}

	fn mark_phase(&mut self) {
		//the current dynamic-wind checkpoint chain
		if let Some(cp) = self.cp {
			mark_object(&mut self.heap, cp);
		}

		//the evaluator's operand stack
		for &v in &self.stack {
			mark_value(&mut self.heap, v);
		}

		//each call frame's register context
		for ci in &self.ci {
			if let Some(cxt) = ci.cxt {
				mark_object(&mut self.heap, cxt);
			}
		}

		//the root arena
		for i in 0..self.arena.len() {
			mark_object(&mut self.heap, self.arena.get(i));
		}

		//literal pools of registered compiled code
		for irep in &self.ireps {
			if let Some(irep) = irep.upgrade() {
				for &v in irep.pool.iter() {
					mark_value(&mut self.heap, v);
				}
			}
		}

		//globals, macros, the in-flight error, the features list
		mark_value(&mut self.heap, self.globals);
		mark_value(&mut self.heap, self.macros);
		mark_value(&mut self.heap, self.err);
		mark_value(&mut self.heap, self.features);

		//the library table
		for library in self.ltable.values() {
			mark_object(&mut self.heap, library.name);
			mark_object(&mut self.heap, library.env);
			mark_object(&mut self.heap, library.exports);
		}

		//ephemeron fixed point: a weak entry's value is marked only once its key has
		//been proven live by some other path. one pass isn't enough, because marking a
		//value can make another entry's key live (or reach another weak map entirely),
		//so repeat until a full pass over the chain marks nothing new.
		loop {
			let mut newly_marked = 0;

			let mut link = self.heap.weaks;
			while let Some(wref) = link {
				let weak = match &wref.get().kind {
					ObjKind::Weak(weak) => weak,
					_ => unreachable!()
				};

				let mut pending: SmallVec<[Val; 8]> = SmallVec::new();
				for (&key, &value) in weak.map.borrow().iter() {
					if self.heap.is_marked(key) {
						if let Val::Obj(value_obj) = value {
							if !self.heap.is_marked(value_obj) {
								pending.push(value);
							}
						}
					}
				}

				for value in pending {
					mark_value(&mut self.heap, value);
					newly_marked += 1;
				}

				link = weak.prev.get();
			}

			if newly_marked == 0 {
				break
			}
		}
	}

	fn sweep_phase(&mut self) {
		//drop weak entries whose keys died, unlinking the transient chain as it drains.
		//this must happen before the page sweep wipes the mark state.
		while let Some(wref) = self.heap.weaks {
			let weak = match &wref.get().kind {
				ObjKind::Weak(weak) => weak,
				_ => unreachable!()
			};

			self.heap.weaks = weak.prev.get();
			weak.prev.set(None);

			let heap = &self.heap;
			weak.map.borrow_mut().retain(|&key, _| heap.is_marked(key));
		}

		//purge dead interned symbols, so a later lookup can't resurrect a dangling
		//pointer out of the oblist
		let heap = &self.heap;
		self.oblist.retain(|_, &mut sym| heap.is_marked(sym));

		//finalize and reclaim every dead cell; survivors are reset to white
		let mut finalized = 0;
		let (inuse, total) = {
			let allocator = &self.allocator;
			self.heap.pages.sweep(&mut |obj| {
				finalized += 1;
				finalize_object(allocator, obj);
			})
		};

		self.stats.finalized += finalized;
		self.stats.inuse_units = inuse;
		self.stats.total_units = total;

		//registry entries for compiled code die once their last proc is finalized
		self.ireps.retain(|irep| irep.strong_count() > 0);

		//when the sweep recovered little, request another page ahead of demand
		if inuse as f32 >= self.page_request_ratio * total as f32 {
			self.heap.pages.morecore(&self.allocator);
		}
	}

	//the allocation ladder: try the page store, then collect and retry, then grow and
	//retry, then give up. the cell is written before the caller can observe it.
	pub(crate) fn obj_alloc_unprotected(&mut self, kind: ObjKind) -> ObjRef {
		if self.gc_stress {
			self.collect();
		}

		let size = size_of::<Obj>();
		let cell = match self.heap.pages.alloc(size) {
			Some(cell) => cell,
			None => {
				self.collect();
				match self.heap.pages.alloc(size) {
					Some(cell) => cell,
					None => {
						self.heap.pages.morecore(&self.allocator);
						match self.heap.pages.alloc(size) {
							Some(cell) => cell,
							None => panic!("(GC) memory exhausted")
						}
					}
				}
			}
		};

		unsafe {
			ptr::write(cell.as_ptr(), Obj::new(kind));
		}

		ObjRef(cell)
	}

	pub(crate) fn obj_alloc(&mut self, kind: ObjKind) -> ObjRef {
		let obj = self.obj_alloc_unprotected(kind);
		self.arena.push(obj, &self.allocator);
		obj
	}

	/**
	Allocates `n` bytes whose lifetime is managed by the collector.

	The buffer is owned by a protected `data` object; it's freed when that object is
	finalized, so it lives at least until the current arena scope is popped.
	*/
	pub fn alloca(&mut self, n: usize) -> *mut u8 {
		let buf = self.allocator.malloc(n);
		self.make_data(&ALLOCA_TYPE, buf);
		buf
	}

	///Enables or disables collection. While disabled, [`collect`](#method.collect) is a no-op.
	pub fn set_gc_enabled(&mut self, enabled: bool) {
		self.gc_enabled = enabled;
	}

	/**
	Enables or disables allocation stress: while enabled, every allocation runs a full
	collection first. Brutal, but very good at flushing out missing roots.
	*/
	pub fn set_gc_stress(&mut self, stress: bool) {
		self.gc_stress = stress;
	}

	pub fn heap_stats(&self) -> HeapStats {
		HeapStats {
			pages: self.heap.pages.page_count(),
			total_units: self.heap.pages.total_units(),
			..self.stats
		}
	}
}
