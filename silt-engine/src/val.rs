use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::num::{FpCategory};
use super::obj::{ObjRef};

//-------------------------------------------------------------------------------------------------
// Val
//-------------------------------------------------------------------------------------------------

/**
Any Silt value.

`Val` is a small `Copy` tagged union. The immediate variants (`Nil`, `Undef`, `Unbound`,
`Bool`, `Int`, `Flo`, `Char`) carry their payload inline and are invisible to the garbage
collector. The `Obj` variant points at a cell on the garbage-collected heap; it stays valid
for as long as the object is reachable from a root and its [`Engine`](struct.Engine.html)
is alive.
*/

#[derive(Clone, Copy)]
pub enum Val {
	Nil,
	Undef,
	Unbound,
	Bool(bool),
	Int(i32),
	Flo(f32),
	Char(char),
	Obj(ObjRef)
}

impl Default for Val {
	fn default() -> Val {
		Val::Nil
	}
}

macro_rules! impl_val {
	($(($variant:ident, $type:ty, $type_name:literal, $a_type_name:literal, $is_type:ident,
	    $unwrap_type:ident)),+) => (
		impl Val {
			$(
				#[inline]
				pub fn $is_type(&self) -> bool {
					match *self {
						Val::$variant(_) => true,
						_ => false
					}
				}

				#[inline]
				pub fn $unwrap_type(self) -> $type {
					match self {
						Val::$variant(inner) => inner,
						_ => panic!("attempted to unwrap {} Val as {}", self.a_type_name(),
						            $a_type_name)
					}
				}
			)+
		}
	);
}

impl_val!(
	(Bool, bool, "bool", "a bool", is_bool, unwrap_bool),
	(Int, i32, "int", "an int", is_int, unwrap_int),
	(Flo, f32, "flo", "a flo", is_flo, unwrap_flo),
	(Char, char, "char", "a char", is_char, unwrap_char),
	(Obj, ObjRef, "obj", "an obj", is_obj, unwrap_obj)
);

impl Val {
	///Returns the name of this value's primitive type, such as `"nil"` or `"pair"`.
	pub fn type_name(&self) -> &'static str {
		match *self {
			Val::Nil => "nil",
			Val::Undef => "undef",
			Val::Unbound => "unbound",
			Val::Bool(_) => "bool",
			Val::Int(_) => "int",
			Val::Flo(_) => "flo",
			Val::Char(_) => "char",
			Val::Obj(obj) => obj.get().tt().name()
		}
	}

	/**
	Returns the name of this value's primitive type, prefixed with the indefinite article,
	such as `"a pair"` or `"an env"`.

	```ignore
	match val {
		Val::Int(_) => (),
		_ => bail!("expected an int, received {}", val.a_type_name())
	}
	```
	*/
	pub fn a_type_name(&self) -> &'static str {
		match *self {
			Val::Nil => "a nil",
			Val::Undef => "an undef",
			Val::Unbound => "an unbound",
			Val::Bool(_) => "a bool",
			Val::Int(_) => "an int",
			Val::Flo(_) => "a flo",
			Val::Char(_) => "a char",
			Val::Obj(obj) => obj.get().tt().a_name()
		}
	}

	pub fn is_nil(&self) -> bool {
		matches!(*self, Val::Nil)
	}

	///Returns `true` if the value is anything other than nil or `#f`.
	pub fn is_truthy(&self) -> bool {
		match *self {
			Val::Nil | Val::Bool(false) => false,
			_ => true
		}
	}

	///Returns `true` if the value is nil or `#f`.
	pub fn is_falsy(&self) -> bool {
		!self.is_truthy()
	}

	/**
	Returns `true` if the two values are identical: the same immediate, or the same
	heap object.

	This is `eqv`-style identity. It never dereferences a heap object, so it may safely
	be used to compare a stale reference against a fresh one.
	*/
	pub fn same(&self, other: &Val) -> bool {
		match (*self, *other) {
			(Val::Nil, Val::Nil) => true,
			(Val::Undef, Val::Undef) => true,
			(Val::Unbound, Val::Unbound) => true,
			(Val::Bool(b0), Val::Bool(b1)) => b0 == b1,
			(Val::Int(i0), Val::Int(i1)) => i0 == i1,
			(Val::Flo(f0), Val::Flo(f1)) => f0 == f1,
			(Val::Char(c0), Val::Char(c1)) => c0 == c1,
			(Val::Obj(o0), Val::Obj(o1)) => o0 == o1,
			_ => false
		}
	}
}

//`val0 == val1` has the semantics of `same`: object comparisons are by identity, not
//by structure.
impl PartialEq<Val> for Val {
	fn eq(&self, other: &Val) -> bool {
		self.same(other)
	}
}

impl Debug for Val {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match *self {
			Val::Nil => write!(f, "#n"),
			Val::Undef => write!(f, "#undef"),
			Val::Unbound => write!(f, "#unbound"),
			Val::Bool(true) => write!(f, "#t"),
			Val::Bool(false) => write!(f, "#f"),
			Val::Int(i) => write!(f, "{}", i),
			Val::Flo(fl) => write!(f, "{}", fl),
			Val::Char(c) => write!(f, "#\\{}", c),
			Val::Obj(obj) => write!(f, "#<{} 0x{:x}>", obj.get().tt().name(), obj.as_usize())
		}
	}
}

//-------------------------------------------------------------------------------------------------
// Key
//-------------------------------------------------------------------------------------------------

/**
A thin wrapper over `Val` which enables it to be used as a hash-table key.

Its `Eq` implementation follows [`same`](enum.Val.html#method.same), except that NaN
floats compare equal to one another so that the `Hash` contract holds.
*/

#[derive(Clone, Copy)]
pub struct Key(pub Val);

impl PartialEq<Key> for Key {
	fn eq(&self, other: &Key) -> bool {
		match (self.0, other.0) {
			(Val::Flo(f0), Val::Flo(f1)) => {
				match (f0.classify(), f1.classify()) {
					(FpCategory::Nan, FpCategory::Nan) => true,
					_ => f0 == f1
				}
			}
			(ref v0, ref v1) => v0.same(v1)
		}
	}
}

impl Eq for Key { }

impl Hash for Key {
	fn hash<H: Hasher>(&self, state: &mut H) {
		//two keys which compare equal must feed the same bytes to the hasher. floats need
		//care: all zeroes hash alike, and all NaNs hash alike.
		match self.0 {
			Val::Nil => 0u8.hash(state),
			Val::Undef => 1u8.hash(state),
			Val::Unbound => 2u8.hash(state),
			Val::Bool(b) => b.hash(state),
			Val::Int(i) => i.hash(state),
			Val::Flo(f) => {
				match f.classify() {
					FpCategory::Zero => 3u8.hash(state),
					FpCategory::Infinite => {
						if f > 0.0 { 4u8.hash(state) } else { 5u8.hash(state) }
					}
					FpCategory::Nan => 6u8.hash(state),
					FpCategory::Normal | FpCategory::Subnormal => f.to_bits().hash(state)
				}
			}
			Val::Char(c) => c.hash(state),
			Val::Obj(obj) => obj.as_usize().hash(state)
		}
	}
}

impl Debug for Key {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Debug::fmt(&self.0, f)
	}
}
