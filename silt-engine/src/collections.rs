use std::cell::{Cell};
use std::rc::{Rc};
use super::engine::{Engine};
use super::error::{SResult};
use super::obj::{Blob, Dict, ObjKind, Pair, Str, Tt, Vector, WeakMap};
use super::val::{Key, Val};

//the constructors below follow one discipline: allocate, fill, and hand back a value
//which is already protected in the arena. arguments must be kept reachable by the
//caller across the call, since allocation is a safe point. compound builders bracket
//their interior allocations with enter/leave, then re-protect the result.

impl Engine {
	//---------------------------------------------------------------------------------------------
	// pairs
	//---------------------------------------------------------------------------------------------

	pub fn cons(&mut self, car: Val, cdr: Val) -> Val {
		let obj = self.obj_alloc(ObjKind::Pair(Pair {
			car: Cell::new(car),
			cdr: Cell::new(cdr)
		}));
		Val::Obj(obj)
	}

	///Builds a proper list from a slice of values.
	pub fn list(&mut self, vals: &[Val]) -> Val {
		let mark = self.enter();

		let mut acc = Val::Nil;
		for &v in vals.iter().rev() {
			acc = self.cons(v, acc);
		}

		self.leave(mark);
		self.protect(acc)
	}

	pub fn car(&self, pair: Val) -> SResult<Val> {
		let obj = self.expect_obj(pair, Tt::Pair)?;
		match &obj.get().kind {
			ObjKind::Pair(pair) => Ok(pair.car.get()),
			_ => unreachable!()
		}
	}

	pub fn cdr(&self, pair: Val) -> SResult<Val> {
		let obj = self.expect_obj(pair, Tt::Pair)?;
		match &obj.get().kind {
			ObjKind::Pair(pair) => Ok(pair.cdr.get()),
			_ => unreachable!()
		}
	}

	pub fn set_car(&self, pair: Val, v: Val) -> SResult<()> {
		let obj = self.expect_obj(pair, Tt::Pair)?;
		match &obj.get().kind {
			ObjKind::Pair(pair) => {
				pair.car.set(v);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	pub fn set_cdr(&self, pair: Val, v: Val) -> SResult<()> {
		let obj = self.expect_obj(pair, Tt::Pair)?;
		match &obj.get().kind {
			ObjKind::Pair(pair) => {
				pair.cdr.set(v);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// vectors
	//---------------------------------------------------------------------------------------------

	pub fn make_vector(&mut self, len: usize, fill: Val) -> Val {
		let data = vec![Cell::new(fill); len].into_boxed_slice();
		let obj = self.obj_alloc(ObjKind::Vector(Vector { data }));
		Val::Obj(obj)
	}

	pub fn vector_len(&self, vector: Val) -> SResult<usize> {
		let obj = self.expect_obj(vector, Tt::Vector)?;
		match &obj.get().kind {
			ObjKind::Vector(vector) => Ok(vector.data.len()),
			_ => unreachable!()
		}
	}

	pub fn vector_ref(&self, vector: Val, i: usize) -> SResult<Val> {
		let obj = self.expect_obj(vector, Tt::Vector)?;
		match &obj.get().kind {
			ObjKind::Vector(vector) => {
				ensure!(i < vector.data.len(), "index {} out of bounds for a vector of \
				        length {}", i, vector.data.len());
				Ok(vector.data[i].get())
			}
			_ => unreachable!()
		}
	}

	pub fn vector_set(&self, vector: Val, i: usize, v: Val) -> SResult<()> {
		let obj = self.expect_obj(vector, Tt::Vector)?;
		match &obj.get().kind {
			ObjKind::Vector(vector) => {
				ensure!(i < vector.data.len(), "index {} out of bounds for a vector of \
				        length {}", i, vector.data.len());
				vector.data[i].set(v);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// blobs
	//---------------------------------------------------------------------------------------------

	pub fn make_blob(&mut self, data: &[u8]) -> Val {
		let obj = self.obj_alloc(ObjKind::Blob(Blob {
			data: data.to_vec().into_boxed_slice()
		}));
		Val::Obj(obj)
	}

	pub fn blob_len(&self, blob: Val) -> SResult<usize> {
		let obj = self.expect_obj(blob, Tt::Blob)?;
		match &obj.get().kind {
			ObjKind::Blob(blob) => Ok(blob.data.len()),
			_ => unreachable!()
		}
	}

	pub fn blob_copy(&self, blob: Val) -> SResult<Vec<u8>> {
		let obj = self.expect_obj(blob, Tt::Blob)?;
		match &obj.get().kind {
			ObjKind::Blob(blob) => Ok(blob.data.to_vec()),
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// strings
	//---------------------------------------------------------------------------------------------

	pub fn make_str(&mut self, s: &str) -> Val {
		let obj = self.obj_alloc(ObjKind::Str(Str { rope: Rc::from(s) }));
		Val::Obj(obj)
	}

	///Returns a handle to the string's rope. The rope is shared, not copied.
	pub fn str_value(&self, s: Val) -> SResult<Rc<str>> {
		let obj = self.expect_obj(s, Tt::Str)?;
		match &obj.get().kind {
			ObjKind::Str(s) => Ok(Rc::clone(&s.rope)),
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// dicts
	//---------------------------------------------------------------------------------------------

	pub fn make_dict(&mut self) -> Val {
		let obj = self.obj_alloc(ObjKind::Dict(Dict::new()));
		Val::Obj(obj)
	}

	pub fn dict_set(&self, dict: Val, k: Val, v: Val) -> SResult<()> {
		let obj = self.expect_obj(dict, Tt::Dict)?;
		match &obj.get().kind {
			ObjKind::Dict(dict) => {
				dict.map.borrow_mut().insert(Key(k), v);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	pub fn dict_ref(&self, dict: Val, k: Val) -> SResult<Option<Val>> {
		let obj = self.expect_obj(dict, Tt::Dict)?;
		match &obj.get().kind {
			ObjKind::Dict(dict) => Ok(dict.map.borrow().get(&Key(k)).copied()),
			_ => unreachable!()
		}
	}

	pub fn dict_del(&self, dict: Val, k: Val) -> SResult<()> {
		let obj = self.expect_obj(dict, Tt::Dict)?;
		match &obj.get().kind {
			ObjKind::Dict(dict) => {
				match dict.map.borrow_mut().remove(&Key(k)) {
					Some(_) => Ok(()),
					None => Err(error!("dict_del() with a key which is not in the dict"))
				}
			}
			_ => unreachable!()
		}
	}

	pub fn dict_len(&self, dict: Val) -> SResult<usize> {
		let obj = self.expect_obj(dict, Tt::Dict)?;
		match &obj.get().kind {
			ObjKind::Dict(dict) => Ok(dict.map.borrow().len()),
			_ => unreachable!()
		}
	}

	//---------------------------------------------------------------------------------------------
	// weak maps
	//---------------------------------------------------------------------------------------------

	pub fn make_weak(&mut self) -> Val {
		let obj = self.obj_alloc(ObjKind::Weak(WeakMap::new()));
		Val::Obj(obj)
	}

	/**
	Stores an entry into a weak map. The key must be a heap object.

	The entry survives a collection only while the key is reachable through some path
	other than this entry's value slot; the value is kept alive by the entry for as
	long as the key is.
	*/
	pub fn weak_set(&self, weak: Val, k: Val, v: Val) -> SResult<()> {
		let obj = self.expect_obj(weak, Tt::Weak)?;
		let k = match k {
			Val::Obj(k) => k,
			_ => bail!("attempted to use {} as a weak-map key", k.a_type_name())
		};

		match &obj.get().kind {
			ObjKind::Weak(weak) => {
				weak.map.borrow_mut().insert(k, v);
				Ok(())
			}
			_ => unreachable!()
		}
	}

	pub fn weak_ref(&self, weak: Val, k: Val) -> SResult<Option<Val>> {
		let obj = self.expect_obj(weak, Tt::Weak)?;
		let k = match k {
			Val::Obj(k) => k,
			_ => bail!("attempted to use {} as a weak-map key", k.a_type_name())
		};

		match &obj.get().kind {
			ObjKind::Weak(weak) => Ok(weak.map.borrow().get(&k).copied()),
			_ => unreachable!()
		}
	}

	pub fn weak_has(&self, weak: Val, k: Val) -> SResult<bool> {
		Ok(self.weak_ref(weak, k)?.is_some())
	}

	pub fn weak_del(&self, weak: Val, k: Val) -> SResult<()> {
		let obj = self.expect_obj(weak, Tt::Weak)?;
		let k = match k {
			Val::Obj(k) => k,
			_ => bail!("attempted to use {} as a weak-map key", k.a_type_name())
		};

		match &obj.get().kind {
			ObjKind::Weak(weak) => {
				match weak.map.borrow_mut().remove(&k) {
					Some(_) => Ok(()),
					None => Err(error!("weak_del() with a key which is not in the weak map"))
				}
			}
			_ => unreachable!()
		}
	}

	pub fn weak_len(&self, weak: Val) -> SResult<usize> {
		let obj = self.expect_obj(weak, Tt::Weak)?;
		match &obj.get().kind {
			ObjKind::Weak(weak) => Ok(weak.map.borrow().len()),
			_ => unreachable!()
		}
	}
}
