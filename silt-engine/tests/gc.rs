use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use silt_engine::{
	default_allocf, Allocator, DataType, Engine, EngineBuilder, GcBackend, Irep, Marker,
	SResult, Val,
};

const BACKENDS: [GcBackend; 2] = [GcBackend::FreeList, GcBackend::Bitmap];

fn each_backend(f: fn(&mut Engine)) {
	for backend in BACKENDS {
		let mut engine = EngineBuilder::new().backend(backend).build();
		f(&mut engine);
	}
}

#[test]
fn long_chains_survive_and_die() {
	each_backend(|engine| {
		let outer = engine.enter();

		let mark = engine.enter();
		let mut head = Val::Nil;
		for i in 0..10_000 {
			head = engine.cons(Val::Int(i), head);
		}
		engine.leave(mark);
		let head = engine.protect(head);

		//tracing a 10k-pair cdr chain must not overflow the stack, and must keep
		//every link alive
		engine.collect();

		let mut v = head;
		let mut len = 0;
		while !v.is_nil() {
			assert_eq!(engine.car(v).unwrap(), Val::Int(9_999 - len));
			v = engine.cdr(v).unwrap();
			len += 1;
		}
		assert_eq!(len, 10_000);

		//dropping the head kills the whole chain
		let before = engine.heap_stats().finalized;
		engine.leave(outer);
		engine.collect();
		assert_eq!(engine.heap_stats().finalized - before, 10_000);
	});
}

#[test]
fn cycles_are_reclaimed() {
	each_backend(|engine| {
		let mark = engine.enter();
		let a = engine.cons(Val::Nil, Val::Nil);
		engine.set_cdr(a, a).unwrap();

		engine.collect();
		assert_eq!(engine.cdr(a).unwrap(), a);

		let before = engine.heap_stats().finalized;
		engine.leave(mark);
		engine.collect();
		assert_eq!(engine.heap_stats().finalized - before, 1);
	});
}

#[test]
fn consecutive_collections_are_idempotent() {
	each_backend(|engine| {
		let mark = engine.enter();
		for i in 0..100 {
			engine.cons(Val::Int(i), Val::Nil);
		}
		engine.leave(mark);

		engine.collect();
		let after_first = engine.heap_stats().finalized;
		engine.collect();
		assert_eq!(engine.heap_stats().finalized, after_first);
	});
}

#[test]
fn ephemeron_chains_reach_a_fixed_point() {
	each_backend(|engine| {
		let outer = engine.enter();
		let w = engine.make_weak();
		let k1 = engine.make_str("k1");

		let inner = engine.enter();
		let k2 = engine.make_str("k2");
		let k3 = engine.make_str("k3");
		let v = engine.make_str("v");
		engine.weak_set(w, k1, k2).unwrap();
		engine.weak_set(w, k2, k3).unwrap();
		engine.weak_set(w, k3, v).unwrap();
		engine.leave(inner);

		//k1 is rooted, so a single pass would only find w[k1]; the fixed point has
		//to discover k2 and k3 as keys in later passes
		engine.collect();
		assert_eq!(engine.weak_len(w).unwrap(), 3);
		assert_eq!(engine.weak_ref(w, k1).unwrap(), Some(k2));
		assert_eq!(engine.weak_ref(w, k2).unwrap(), Some(k3));
		assert_eq!(engine.weak_ref(w, k3).unwrap(), Some(v));
		assert_eq!(&*engine.str_value(v).unwrap(), "v");

		//dropping k1 severs the chain: every entry vanishes in one collection
		engine.leave(outer);
		let w = engine.protect(w);
		engine.collect();
		assert_eq!(engine.weak_len(w).unwrap(), 0);
	});
}

#[test]
fn weak_values_do_not_keep_their_own_keys_alive() {
	each_backend(|engine| {
		let outer = engine.enter();
		let w = engine.make_weak();

		let inner = engine.enter();
		let k = engine.make_str("key");
		let v = engine.cons(Val::Nil, Val::Nil);
		//v -> k: the only path to k outside the weak map runs through the entry's
		//own value, which must not count
		engine.set_car(v, k).unwrap();
		engine.weak_set(w, k, v).unwrap();
		engine.leave(inner);

		engine.collect();
		assert_eq!(engine.weak_len(w).unwrap(), 0);
		engine.leave(outer);
	});
}

#[test]
fn dead_symbols_are_purged_from_the_oblist() {
	each_backend(|engine| {
		let outer = engine.enter();
		let w = engine.make_weak();

		let mark = engine.enter();
		let s1 = engine.intern("transient");
		assert_eq!(engine.intern("transient"), s1);
		assert_eq!(&*engine.sym_name(s1).unwrap(), "transient");
		engine.weak_set(w, s1, Val::Int(7)).unwrap();
		engine.leave(mark);

		engine.collect();

		//the symbol died: its weak entry is gone, and re-interning the same name
		//builds a fresh, fully-formed symbol instead of resurrecting a table entry
		assert_eq!(engine.weak_len(w).unwrap(), 0);
		let s2 = engine.intern("transient");
		assert_eq!(&*engine.sym_name(s2).unwrap(), "transient");
		assert_eq!(engine.weak_ref(w, s2).unwrap(), None);
		assert_eq!(engine.intern("transient"), s2);

		engine.leave(outer);
	});
}

static DTOR_HITS: AtomicUsize = AtomicUsize::new(0);

fn counting_dtor(_allocator: &Allocator, data: *mut u8) {
	DTOR_HITS.fetch_add(1, Ordering::SeqCst);
	unsafe {
		drop(Box::from_raw(data as *mut u64));
	}
}

static COUNTED: DataType = DataType {
	name: "counted",
	size: 8,
	mark: None,
	dtor: Some(counting_dtor)
};

#[test]
fn data_dtors_run_exactly_once() {
	for backend in BACKENDS {
		let mut engine = EngineBuilder::new().backend(backend).build();
		let before = DTOR_HITS.load(Ordering::SeqCst);

		let mark = engine.enter();
		for _ in 0..10 {
			let payload = Box::into_raw(Box::new(0u64)) as *mut u8;
			engine.make_data(&COUNTED, payload);
		}
		engine.leave(mark);

		engine.collect();
		assert_eq!(DTOR_HITS.load(Ordering::SeqCst) - before, 10);

		//nothing left to reclaim
		engine.collect();
		assert_eq!(DTOR_HITS.load(Ordering::SeqCst) - before, 10);

		//a data object still live at shutdown is not finalized
		let payload = Box::into_raw(Box::new(0u64)) as *mut u8;
		engine.make_data(&COUNTED, payload);
		drop(engine);
		assert_eq!(DTOR_HITS.load(Ordering::SeqCst) - before, 10);

		unsafe {
			drop(Box::from_raw(payload as *mut u64));
		}
	}
}

fn val_box_mark(data: *mut u8, marker: &mut Marker) {
	let v = unsafe { *(data as *mut Val) };
	marker.mark(v);
}

fn val_box_dtor(_allocator: &Allocator, data: *mut u8) {
	unsafe {
		drop(Box::from_raw(data as *mut Val));
	}
}

static VAL_BOX: DataType = DataType {
	name: "val-box",
	size: 16,
	mark: Some(val_box_mark),
	dtor: Some(val_box_dtor)
};

#[test]
fn data_mark_hooks_keep_owned_values_alive() {
	each_backend(|engine| {
		let outer = engine.enter();

		let mark = engine.enter();
		let s = engine.make_str("boxed");
		let payload = Box::into_raw(Box::new(s)) as *mut u8;
		let data = engine.make_data(&VAL_BOX, payload);
		engine.leave(mark);
		let data = engine.protect(data);

		engine.collect();

		let payload = engine.data_ptr(data, &VAL_BOX).unwrap();
		let s = unsafe { *(payload as *mut Val) };
		assert_eq!(&*engine.str_value(s).unwrap(), "boxed");

		engine.leave(outer);
	});
}

static NET_ALLOCS: AtomicIsize = AtomicIsize::new(0);

unsafe fn counting_allocf(userdata: *mut (), ptr: *mut u8, size: usize) -> *mut u8 {
	if ptr.is_null() && size > 0 {
		NET_ALLOCS.fetch_add(1, Ordering::SeqCst);
	}
	if !ptr.is_null() && size == 0 {
		NET_ALLOCS.fetch_sub(1, Ordering::SeqCst);
	}
	default_allocf(userdata, ptr, size)
}

#[test]
fn alloca_buffers_track_their_data_object() {
	for backend in BACKENDS {
		let net0 = NET_ALLOCS.load(Ordering::SeqCst);

		{
			let mut engine = EngineBuilder::new()
				.backend(backend)
				.allocf(counting_allocf, ptr::null_mut())
				.build();

			let mark = engine.enter();
			let buf = engine.alloca(1 << 20);
			unsafe {
				ptr::write_bytes(buf, 0xab, 1 << 20);
			}
			let with_buf = NET_ALLOCS.load(Ordering::SeqCst);

			engine.leave(mark);
			engine.collect();

			//the dtor freed the buffer through the embedder's callback
			assert!(NET_ALLOCS.load(Ordering::SeqCst) < with_buf);
		}

		//pages, arena and the free-list sentinel were all returned on close
		assert_eq!(NET_ALLOCS.load(Ordering::SeqCst), net0);
	}
}

#[test]
fn pages_grow_on_demand_and_stop_growing_when_idle() {
	each_backend(|engine| {
		//bootstrap faults in the first page
		assert_eq!(engine.heap_stats().pages, 1);

		//filling the heap with live data must never fail: the ladder collects, then
		//grows, then retries
		let mark = engine.enter();
		while engine.heap_stats().pages < 3 {
			engine.cons(Val::Nil, Val::Nil);
		}
		engine.leave(mark);

		engine.collect();
		let stats = engine.heap_stats();
		assert!((stats.inuse_units as f32) < 0.875 * stats.total_units as f32);

		//an idle heap stops growing
		let pages = stats.pages;
		engine.collect();
		assert_eq!(engine.heap_stats().pages, pages);
	});
}

#[test]
fn arena_marks_are_lifo() {
	each_backend(|engine| {
		let m0 = engine.enter();
		let x = engine.make_str("x");
		let m1 = engine.enter();
		let _y = engine.make_str("y");
		engine.leave(m1);

		let before = engine.heap_stats().finalized;
		engine.collect();
		assert_eq!(&*engine.str_value(x).unwrap(), "x");
		assert_eq!(engine.heap_stats().finalized - before, 1);

		engine.leave(m0);

		//leave(enter()) is a no-op
		let m = engine.enter();
		engine.leave(m);
		engine.collect();
	});
}

#[test]
fn stress_mode_respects_the_root_discipline() {
	for backend in BACKENDS {
		let mut engine = EngineBuilder::new().backend(backend).gc_stress(true).build();

		let mark = engine.enter();
		let vals: Vec<Val> = (0..100).map(Val::Int).collect();
		let list = engine.list(&vals);

		let mut v = list;
		for i in 0..100 {
			assert_eq!(engine.car(v).unwrap(), Val::Int(i));
			v = engine.cdr(v).unwrap();
		}
		assert!(v.is_nil());

		//interning under stress exercises the two-step string-then-symbol allocation
		let s = engine.intern("stressed");
		assert_eq!(&*engine.sym_name(s).unwrap(), "stressed");

		engine.leave(mark);
	}
}

#[test]
fn evaluator_slots_are_roots() {
	each_backend(|engine| {
		let mark = engine.enter();

		let on_stack = engine.make_str("operand");
		let in_reg = engine.make_str("register");
		let in_global = engine.make_str("global");
		let in_err = engine.make_str("error");
		let cxt = engine.make_cxt(4, None).unwrap();
		engine.cxt_set_reg(cxt, 2, in_reg).unwrap();

		engine.stack_push(on_stack);
		engine.ci_push(0, Some(cxt)).unwrap();
		engine.global_set("kept", in_global).unwrap();
		engine.set_error_value(in_err);
		engine.add_feature("r7rs");
		engine.define_library("silt.base").unwrap();

		//none of these are in the arena any more; the collector has to find them
		//through the evaluator's own slots
		engine.leave(mark);
		engine.collect();

		let popped = engine.stack_pop().unwrap();
		assert_eq!(&*engine.str_value(popped).unwrap(), "operand");
		assert_eq!(engine.cxt_reg(cxt, 2).unwrap(), in_reg);
		assert_eq!(&*engine.str_value(in_reg).unwrap(), "register");
		assert_eq!(engine.global_ref("kept").unwrap(), Some(in_global));
		assert_eq!(engine.error_value(), in_err);

		let features = engine.features();
		let feature_sym = engine.car(features).unwrap();
		assert_eq!(&*engine.sym_name(feature_sym).unwrap(), "r7rs");

		assert!(engine.library_env("silt.base").is_some());
		assert!(engine.library_exports("silt.base").is_some());

		let _ = engine.ci_pop();
	});
}

#[test]
fn cxt_chains_are_traced_through_up() {
	each_backend(|engine| {
		let mark = engine.enter();
		let kept = engine.make_str("deep");
		let outer_cxt = engine.make_cxt(1, None).unwrap();
		engine.cxt_set_reg(outer_cxt, 0, kept).unwrap();

		//a chain of nested frames, rooted only by the innermost one
		let mut cxt = outer_cxt;
		for _ in 0..100 {
			cxt = engine.make_cxt(0, Some(cxt)).unwrap();
		}
		engine.leave(mark);

		engine.ci_push(0, Some(cxt)).unwrap();
		engine.collect();
		assert_eq!(engine.cxt_reg(outer_cxt, 0).unwrap(), kept);
		assert_eq!(&*engine.str_value(kept).unwrap(), "deep");
		let _ = engine.ci_pop();
	});
}

#[test]
fn registered_irep_pools_are_roots() {
	each_backend(|engine| {
		let mark = engine.enter();
		let lit = engine.make_str("literal");
		let sym = engine.intern("pooled");
		let irep = Irep::new(0, false, vec![0x01, 0x02], vec![lit, sym]);
		engine.register_irep(&irep);
		engine.leave(mark);

		engine.collect();
		assert_eq!(&*engine.str_value(lit).unwrap(), "literal");
		assert_eq!(engine.intern("pooled"), sym);

		//a proc closes over the irep; dropping the embedder handle keeps the pool
		//alive through the proc alone
		let mark = engine.enter();
		let _proc = engine.make_proc(&irep, None).unwrap();
		drop(irep);
		engine.collect();
		assert_eq!(&*engine.str_value(lit).unwrap(), "literal");

		//once the proc dies, so does the registry entry
		engine.leave(mark);
		engine.collect();
	});
}

fn native_nop(_engine: &mut Engine, _args: &[Val]) -> SResult<Val> {
	Ok(Val::Nil)
}

#[test]
fn checkpoint_chains_are_roots() {
	each_backend(|engine| {
		let mark = engine.enter();
		let guard = engine.make_str("wind-guard");
		let before = engine.make_func(native_nop, &[guard]);
		let after = engine.make_func(native_nop, &[]);
		engine.push_checkpoint(Some(before), Some(after)).unwrap();
		engine.push_checkpoint(None, Some(after)).unwrap();
		engine.leave(mark);

		engine.collect();
		assert_eq!(engine.func_local(before, 0).unwrap(), guard);
		assert_eq!(&*engine.str_value(guard).unwrap(), "wind-guard");

		engine.pop_checkpoint().unwrap();
		engine.pop_checkpoint().unwrap();
		assert!(engine.checkpoint().is_none());
		engine.collect();
	});
}

#[test]
fn containers_trace_their_contents() {
	each_backend(|engine| {
		let outer = engine.enter();

		let mark = engine.enter();
		let dict = engine.make_dict();
		let key = engine.make_str("key");
		let blob = engine.make_blob(&[1, 2, 3]);
		engine.dict_set(dict, key, blob).unwrap();
		let vec = engine.make_vector(3, Val::Nil);
		engine.vector_set(vec, 0, dict).unwrap();
		let ty = engine.intern("point");
		let record = engine.make_record(ty, vec);
		engine.leave(mark);
		let record = engine.protect(record);

		engine.collect();

		let vec = engine.record_datum(record).unwrap();
		let dict = engine.vector_ref(vec, 0).unwrap();
		let got = engine.dict_ref(dict, key).unwrap().unwrap();
		assert_eq!(engine.blob_copy(got).unwrap(), vec![1, 2, 3]);
		assert_eq!(engine.dict_len(dict).unwrap(), 1);
		assert_eq!(engine.vector_len(vec).unwrap(), 3);

		engine.leave(outer);
	});
}

#[test]
fn envs_resolve_through_parents_and_trace_their_entries() {
	each_backend(|engine| {
		let outer = engine.enter();

		let mark = engine.enter();
		let parent = engine.make_env(None).unwrap();
		let child = engine.make_env(Some(parent)).unwrap();
		let name = engine.intern("x");
		let uid = engine.intern("x.0");
		engine.env_set(parent, name, uid).unwrap();
		let id = engine.make_id(name, child).unwrap();
		engine.leave(mark);
		let _id = engine.protect(id);

		engine.collect();

		//the id keeps its env chain alive, and resolution still walks the parents
		assert_eq!(engine.env_ref(child, name).unwrap(), Some(uid));

		engine.leave(outer);
	});
}

#[test]
fn error_objects_trace_their_fields() {
	each_backend(|engine| {
		let outer = engine.enter();

		let mark = engine.enter();
		let irr = engine.make_str("irritant");
		let irrs = engine.list(&[irr]);
		let error = engine.make_error("type-error", "bad argument", irrs);
		engine.leave(mark);
		let error = engine.protect(error);

		engine.collect();

		let ty = engine.error_type(error).unwrap();
		assert_eq!(&*engine.sym_name(ty).unwrap(), "type-error");
		let irrs = engine.error_irrs(error).unwrap();
		let irr = engine.car(irrs).unwrap();
		assert_eq!(&*engine.str_value(irr).unwrap(), "irritant");

		engine.leave(outer);
	});
}

#[test]
fn ports_are_inert() {
	each_backend(|engine| {
		let mark = engine.enter();
		let handle = Box::into_raw(Box::new(42u32)) as *mut ();
		let port = engine.make_port(handle);

		engine.collect();
		assert_eq!(engine.port_handle(port).unwrap(), handle);

		engine.leave(mark);
		engine.collect();

		//reclaiming the port must not have touched the embedder's handle
		unsafe {
			assert_eq!(*(handle as *mut u32), 42);
			drop(Box::from_raw(handle as *mut u32));
		}
	});
}

#[test]
fn misuse_is_reported_not_crashed() {
	each_backend(|engine| {
		let mark = engine.enter();

		assert!(engine.car(Val::Int(1)).is_err());
		assert!(engine.sym_name(Val::Nil).is_err());

		let w = engine.make_weak();
		assert!(engine.weak_set(w, Val::Int(1), Val::Nil).is_err());

		let d = engine.make_dict();
		assert!(engine.dict_del(d, Val::Int(1)).is_err());

		assert!(engine.define_library("dup").is_ok());
		assert!(engine.define_library("dup").is_err());

		let v = engine.make_vector(2, Val::Nil);
		assert!(engine.vector_ref(v, 5).is_err());

		assert!(engine.pop_checkpoint().is_err());

		engine.leave(mark);
	});
}

#[test]
fn disabled_gc_is_a_noop() {
	each_backend(|engine| {
		engine.set_gc_enabled(false);

		let mark = engine.enter();
		engine.make_str("still here");
		engine.leave(mark);

		let collections = engine.heap_stats().collections;
		engine.collect();
		assert_eq!(engine.heap_stats().collections, collections);

		engine.set_gc_enabled(true);
		let finalized = engine.heap_stats().finalized;
		engine.collect();
		assert!(engine.heap_stats().finalized > finalized);
	});
}
