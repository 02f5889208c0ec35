use std::cmp::{max};
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use tracing::{trace};
use super::alloc::{Allocator};
use super::obj::{Color, Obj, ObjRef};

//both back-ends carve object cells out of fixed-size pages, measured in 16-byte units.
//the free-list back-end spends one unit per cell on a block header; the bitmap back-end
//spends none, and keeps its bookkeeping in per-page side arrays instead.

pub(crate) const UNIT: usize = 16;
pub(crate) const PAGE_UNITS: usize = 2048;

const BM_WORDS: usize = PAGE_UNITS / 32;

const _: () = assert!(size_of::<FreeHeader>() == UNIT);
const _: () = assert!(size_of::<Unit>() == UNIT);

//cells land on 8-byte boundaries, not 16-byte ones, so the object must not demand more
const _: () = assert!(align_of::<Obj>() <= 8);

#[repr(C, align(8))]
struct Unit {
	_bytes: [u8; UNIT]
}

/**
Selects the page back-end for an [`Engine`](struct.Engine.html)'s heap.

Both back-ends implement the same mark/sweep design; they differ only in how cells are
carved out of pages and where the mark bits live.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcBackend {
	///A classical first-fit free list. Mark bits live in the object headers.
	FreeList,

	///Side bitmaps, one mark bit per unit. Allocation scans for a run of free units.
	Bitmap
}

//-------------------------------------------------------------------------------------------------
// free-list back-end
//-------------------------------------------------------------------------------------------------

//a free block: `next` links the circular, address-ordered free list; `units` is the
//block's length, including this header. an allocated cell keeps `units` in its header
//so that the sweep can walk from object to object.
#[repr(C)]
struct FreeHeader {
	next: *mut FreeHeader,
	units: usize
}

//cells[0] is a permanent zero-size anchor block: it can never satisfy an allocation and
//never coalesces away, so the sweep can always walk the page starting from it.
#[repr(C)]
struct FreePage {
	next: *mut FreePage,
	cells: [FreeHeader; PAGE_UNITS]
}

pub(crate) struct FreeListHeap {
	base: *mut FreeHeader,
	freep: *mut FreeHeader,
	pages: *mut FreePage,
	npages: usize
}

impl FreeListHeap {
	fn open(allocator: &Allocator) -> FreeListHeap {
		let base = allocator.malloc(size_of::<FreeHeader>()) as *mut FreeHeader;
		unsafe {
			(*base).next = base;
			(*base).units = 0;
		}

		FreeListHeap {
			base,
			freep: base,
			pages: ptr::null_mut(),
			npages: 0
		}
	}

	fn close(&mut self, allocator: &Allocator) {
		unsafe {
			while !self.pages.is_null() {
				let page = self.pages;
				self.pages = (*page).next;
				allocator.free(page as *mut u8);
			}
			allocator.free(self.base as *mut u8);
		}

		self.base = ptr::null_mut();
		self.freep = ptr::null_mut();
		self.npages = 0;
	}

	fn morecore(&mut self, allocator: &Allocator) {
		let page = allocator.malloc(size_of::<FreePage>()) as *mut FreePage;

		unsafe {
			(*page).next = self.pages;
			self.pages = page;

			let anchor = ptr::addr_of_mut!((*page).cells) as *mut FreeHeader;
			(*anchor).units = 0;
			self.insert_free(anchor);

			let block = anchor.add(1);
			(*block).units = PAGE_UNITS - 1;
			self.insert_free(block);
		}

		self.npages += 1;
		trace!(pages = self.npages, "free-list heap grew by one page");
	}

	//first-fit over the circular free list, splitting the tail off larger blocks
	fn alloc(&mut self, size: usize) -> Option<NonNull<Obj>> {
		let nunits = (size + UNIT - 1) / UNIT + 1;

		unsafe {
			let mut prevp = self.freep;
			let mut p = (*prevp).next;
			loop {
				if (*p).units >= nunits {
					if (*p).units == nunits {
						(*prevp).next = (*p).next;
					} else {
						(*p).units -= nunits;
						p = p.add((*p).units);
						(*p).units = nunits;
					}
					self.freep = prevp;
					return Some(NonNull::new_unchecked(p.add(1) as *mut Obj))
				}

				if p == self.freep {
					return None
				}

				prevp = p;
				p = (*p).next;
			}
		}
	}

	//insert a block into the free list, keeping it sorted by address and coalescing
	//with adjacent neighbours. the page link field at the head of every page keeps
	//blocks from distinct pages non-adjacent.
	unsafe fn insert_free(&mut self, bp: *mut FreeHeader) {
		let mut p = self.freep;
		loop {
			let next = (*p).next;
			if bp > p && bp < next {
				break
			}
			if p >= next && (bp > p || bp < next) {
				break
			}
			p = next;
		}

		//the upper neighbour is only absorbed if it's a real block: a zero-size anchor
		//or the sentinel must stay linked even when an allocator happens to place it
		//flush against a block
		let next = (*p).next;
		if bp.add((*bp).units) == next && (*next).units > 0 {
			(*bp).units += (*next).units;
			(*bp).next = (*next).next;
		} else {
			(*bp).next = next;
		}

		if p.add((*p).units) == bp {
			(*p).units += (*bp).units;
			(*p).next = (*bp).next;
		} else {
			(*p).next = bp;
		}

		self.freep = p;
	}

	//walk every allocated block in a page: hop between the page's free blocks in address
	//order, stepping through the allocated run after each one by its size headers. the
	//walk escapes as soon as it leaves the page, which is how it terminates when the free
	//list moves on to another page or back to the sentinel.
	unsafe fn each_alloc_in_page(page: *mut FreePage, f: &mut dyn FnMut(*mut FreeHeader)) {
		let basep = ptr::addr_of_mut!((*page).cells) as *mut FreeHeader;
		let endp = basep.add(PAGE_UNITS);

		let mut bp = basep;
		'page: loop {
			let mut p = bp.add(max((*bp).units, 1));
			while p != (*bp).next {
				if p < basep || p >= endp {
					break 'page
				}
				f(p);
				p = p.add((*p).units);
			}
			bp = (*bp).next;
		}
	}

	fn sweep(&mut self, finalize: &mut dyn FnMut(*mut Obj)) -> (usize, usize) {
		let mut inuse = 0;
		let mut total = 0;

		unsafe {
			let mut page = self.pages;
			while !page.is_null() {
				inuse += self.sweep_page(page, finalize);
				total += PAGE_UNITS;
				page = (*page).next;
			}
		}

		(inuse, total)
	}

	unsafe fn sweep_page(
		&mut self,
		page: *mut FreePage,
		finalize: &mut dyn FnMut(*mut Obj)
	) -> usize {
		let mut alive = 0;

		//classify first: reclaiming while walking would splice new free blocks into the
		//very list the walk is following. dead blocks are chained through their (now
		//meaningless) `next` fields and reclaimed afterwards.
		let mut head: *mut FreeHeader = ptr::null_mut();
		let mut tail: *mut FreeHeader = ptr::null_mut();

		FreeListHeap::each_alloc_in_page(page, &mut |p| unsafe {
			let obj = p.add(1) as *mut Obj;
			if (*obj).color.get() == Color::Black {
				(*obj).color.set(Color::White);
				alive += (*p).units;
			} else {
				if head.is_null() {
					head = p;
				}
				if !tail.is_null() {
					(*tail).next = p;
				}
				tail = p;
				(*tail).next = ptr::null_mut();
			}
		});

		while !head.is_null() {
			let p = head;
			head = (*p).next;
			finalize(p.add(1) as *mut Obj);
			self.insert_free(p);
		}

		alive
	}

	fn each_object(&self, f: &mut dyn FnMut(*mut Obj)) {
		unsafe {
			let mut page = self.pages;
			while !page.is_null() {
				FreeListHeap::each_alloc_in_page(page, &mut |p| {
					f(unsafe { p.add(1) } as *mut Obj)
				});
				page = (*page).next;
			}
		}
	}
}

//-------------------------------------------------------------------------------------------------
// bitmap back-end
//-------------------------------------------------------------------------------------------------

//`used` tracks allocated units, `head` discriminates the first unit of each cell, and
//`mark` is only meaningful at the head unit. an object's extent is recoverable from
//`used` and `head` alone: it runs from its head to the next head or free unit.
#[repr(C)]
struct BitmapPage {
	free_units: usize,
	used: [u32; BM_WORDS],
	head: [u32; BM_WORDS],
	mark: [u32; BM_WORDS],
	cells: [Unit; PAGE_UNITS]
}

#[inline]
fn bit_test(words: &[u32; BM_WORDS], i: usize) -> bool {
	words[i / 32] & (1 << (i % 32)) != 0
}

#[inline]
fn bit_set(words: &mut [u32; BM_WORDS], i: usize) {
	words[i / 32] |= 1 << (i % 32);
}

#[inline]
fn bit_clear(words: &mut [u32; BM_WORDS], i: usize) {
	words[i / 32] &= !(1 << (i % 32));
}

unsafe fn extent(page: *mut BitmapPage, i: usize) -> usize {
	let mut j = i + 1;
	while j < PAGE_UNITS && bit_test(&(*page).used, j) && !bit_test(&(*page).head, j) {
		j += 1;
	}
	j - i
}

pub(crate) struct BitmapHeap {
	//sorted by address, so that marking can find an object's page by binary search
	pages: Vec<NonNull<BitmapPage>>
}

impl BitmapHeap {
	fn open(_allocator: &Allocator) -> BitmapHeap {
		BitmapHeap {
			pages: Vec::new()
		}
	}

	fn close(&mut self, allocator: &Allocator) {
		for page in self.pages.drain(..) {
			allocator.free(page.as_ptr() as *mut u8);
		}
	}

	fn morecore(&mut self, allocator: &Allocator) {
		//calloc, so that all three bitmaps start clear
		let raw = allocator.calloc(1, size_of::<BitmapPage>()) as *mut BitmapPage;
		unsafe {
			(*raw).free_units = PAGE_UNITS;
		}

		let page = NonNull::new(raw).unwrap();
		let at = self.pages.partition_point(|p| p.as_ptr() < page.as_ptr());
		self.pages.insert(at, page);

		trace!(pages = self.pages.len(), "bitmap heap grew by one page");
	}

	fn locate(&self, obj: *mut Obj) -> Option<(*mut BitmapPage, usize)> {
		let addr = obj as usize;
		let i = self.pages.partition_point(|p| (p.as_ptr() as usize) <= addr);
		if i == 0 {
			return None
		}

		let page = self.pages[i - 1].as_ptr();
		let cells = unsafe { ptr::addr_of_mut!((*page).cells) } as usize;
		if addr < cells || addr >= cells + PAGE_UNITS * UNIT {
			return None
		}

		Some((page, (addr - cells) / UNIT))
	}

	fn alloc(&mut self, size: usize) -> Option<NonNull<Obj>> {
		let nunits = (size + UNIT - 1) / UNIT;

		unsafe {
			for page in &self.pages {
				let page = page.as_ptr();
				if (*page).free_units < nunits {
					continue
				}

				let mut run = 0;
				for i in 0..PAGE_UNITS {
					if bit_test(&(*page).used, i) {
						run = 0;
						continue
					}

					run += 1;
					if run == nunits {
						let start = i + 1 - nunits;
						for j in start..start + nunits {
							bit_set(&mut (*page).used, j);
						}
						bit_set(&mut (*page).head, start);
						(*page).free_units -= nunits;

						let cells = ptr::addr_of_mut!((*page).cells) as *mut Unit;
						return Some(NonNull::new_unchecked(cells.add(start) as *mut Obj))
					}
				}
			}
		}

		None
	}

	fn mark(&mut self, obj: *mut Obj) {
		match self.locate(obj) {
			Some((page, i)) => {
				debug_assert!(unsafe { bit_test(&(*page).head, i) });
				unsafe {
					bit_set(&mut (*page).mark, i);
				}
			}
			None => debug_assert!(false, "marked an object outside the bitmap heap")
		}
	}

	fn is_marked(&self, obj: *mut Obj) -> bool {
		match self.locate(obj) {
			Some((page, i)) => unsafe { bit_test(&(*page).mark, i) },
			None => {
				debug_assert!(false, "queried an object outside the bitmap heap");
				false
			}
		}
	}

	fn sweep(&mut self, finalize: &mut dyn FnMut(*mut Obj)) -> (usize, usize) {
		let mut inuse = 0;
		let mut total = 0;

		unsafe {
			for page in &self.pages {
				let page = page.as_ptr();
				total += PAGE_UNITS;

				let cells = ptr::addr_of_mut!((*page).cells) as *mut Unit;
				let mut i = 0;
				while i < PAGE_UNITS {
					if !bit_test(&(*page).used, i) {
						i += 1;
						continue
					}

					debug_assert!(bit_test(&(*page).head, i));
					let n = extent(page, i);

					if bit_test(&(*page).mark, i) {
						bit_clear(&mut (*page).mark, i);
						inuse += n;
					} else {
						finalize(cells.add(i) as *mut Obj);
						for j in i..i + n {
							bit_clear(&mut (*page).used, j);
						}
						bit_clear(&mut (*page).head, i);
						(*page).free_units += n;
					}

					i += n;
				}
			}
		}

		(inuse, total)
	}

	fn each_object(&self, f: &mut dyn FnMut(*mut Obj)) {
		unsafe {
			for page in &self.pages {
				let page = page.as_ptr();
				let cells = ptr::addr_of_mut!((*page).cells) as *mut Unit;
				for i in 0..PAGE_UNITS {
					if bit_test(&(*page).used, i) && bit_test(&(*page).head, i) {
						f(cells.add(i) as *mut Obj);
					}
				}
			}
		}
	}
}

//-------------------------------------------------------------------------------------------------
// Pages
//-------------------------------------------------------------------------------------------------

//the two back-ends behind one non-virtual interface. the variant is fixed when the
//engine is built, so every match below is a predictable two-way branch.
pub(crate) enum Pages {
	FreeList(FreeListHeap),
	Bitmap(BitmapHeap)
}

impl Pages {
	pub(crate) fn open(backend: GcBackend, allocator: &Allocator) -> Pages {
		match backend {
			GcBackend::FreeList => Pages::FreeList(FreeListHeap::open(allocator)),
			GcBackend::Bitmap => Pages::Bitmap(BitmapHeap::open(allocator))
		}
	}

	pub(crate) fn close(&mut self, allocator: &Allocator) {
		match self {
			Pages::FreeList(heap) => heap.close(allocator),
			Pages::Bitmap(heap) => heap.close(allocator)
		}
	}

	pub(crate) fn alloc(&mut self, size: usize) -> Option<NonNull<Obj>> {
		match self {
			Pages::FreeList(heap) => heap.alloc(size),
			Pages::Bitmap(heap) => heap.alloc(size)
		}
	}

	pub(crate) fn morecore(&mut self, allocator: &Allocator) {
		match self {
			Pages::FreeList(heap) => heap.morecore(allocator),
			Pages::Bitmap(heap) => heap.morecore(allocator)
		}
	}

	pub(crate) fn mark(&mut self, obj: ObjRef) {
		match self {
			Pages::FreeList(_) => obj.get().color.set(Color::Black),
			Pages::Bitmap(heap) => heap.mark(obj.as_ptr())
		}
	}

	pub(crate) fn is_marked(&self, obj: ObjRef) -> bool {
		match self {
			Pages::FreeList(_) => obj.get().color.get() == Color::Black,
			Pages::Bitmap(heap) => heap.is_marked(obj.as_ptr())
		}
	}

	pub(crate) fn sweep(&mut self, finalize: &mut dyn FnMut(*mut Obj)) -> (usize, usize) {
		match self {
			Pages::FreeList(heap) => heap.sweep(finalize),
			Pages::Bitmap(heap) => heap.sweep(finalize)
		}
	}

	pub(crate) fn each_object(&self, f: &mut dyn FnMut(*mut Obj)) {
		match self {
			Pages::FreeList(heap) => heap.each_object(f),
			Pages::Bitmap(heap) => heap.each_object(f)
		}
	}

	pub(crate) fn page_count(&self) -> usize {
		match self {
			Pages::FreeList(heap) => heap.npages,
			Pages::Bitmap(heap) => heap.pages.len()
		}
	}

	pub(crate) fn total_units(&self) -> usize {
		self.page_count() * PAGE_UNITS
	}
}

//-------------------------------------------------------------------------------------------------
// Heap
//-------------------------------------------------------------------------------------------------

//the heap proper: the page store, plus the transient chain of weak maps reached by the
//current mark phase. the chain must be empty between collections.
pub(crate) struct Heap {
	pub(crate) pages: Pages,
	pub(crate) weaks: Option<ObjRef>
}

impl Heap {
	pub(crate) fn open(backend: GcBackend, allocator: &Allocator) -> Heap {
		Heap {
			pages: Pages::open(backend, allocator),
			weaks: None
		}
	}

	#[inline]
	pub(crate) fn mark(&mut self, obj: ObjRef) {
		self.pages.mark(obj);
	}

	#[inline]
	pub(crate) fn is_marked(&self, obj: ObjRef) -> bool {
		self.pages.is_marked(obj)
	}
}

#[cfg(test)]
mod tests {
	use std::cell::{Cell};
	use std::ptr::{drop_in_place};
	use super::*;
	use super::super::alloc::{default_allocf};
	use super::super::obj::{ObjKind, Pair};
	use super::super::val::{Val};

	fn alloc_pair(pages: &mut Pages) -> Option<ObjRef> {
		let cell = pages.alloc(size_of::<Obj>())?;
		unsafe {
			ptr::write(cell.as_ptr(), Obj::new(ObjKind::Pair(Pair {
				car: Cell::new(Val::Int(1)),
				cdr: Cell::new(Val::Nil)
			})));
		}
		Some(ObjRef(cell))
	}

	fn backend_smoke(backend: GcBackend) {
		let allocator = Allocator::new(default_allocf, ptr::null_mut());
		let mut pages = Pages::open(backend, &allocator);

		//an empty heap has no pages, so the first allocation must fail
		assert!(pages.alloc(size_of::<Obj>()).is_none());
		assert_eq!(pages.page_count(), 0);

		pages.morecore(&allocator);
		assert_eq!(pages.page_count(), 1);

		let kept = alloc_pair(&mut pages).unwrap();
		let dropped = alloc_pair(&mut pages).unwrap();
		assert_ne!(kept, dropped);
		assert!(!pages.is_marked(kept));

		pages.mark(kept);
		assert!(pages.is_marked(kept));
		assert!(!pages.is_marked(dropped));

		let mut finalized = 0;
		let (inuse, total) = pages.sweep(&mut |obj| {
			finalized += 1;
			unsafe { drop_in_place(obj) }
		});
		assert_eq!(finalized, 1);
		assert_eq!(total, PAGE_UNITS);
		assert!(inuse > 0 && inuse < PAGE_UNITS);

		//the survivor was reset to white, so an unmarked sweep reclaims it
		assert!(!pages.is_marked(kept));
		let mut finalized = 0;
		let (inuse, _) = pages.sweep(&mut |obj| {
			finalized += 1;
			unsafe { drop_in_place(obj) }
		});
		assert_eq!(finalized, 1);
		assert_eq!(inuse, 0);

		//everything was returned to the page, so allocation still succeeds without growth
		for _ in 0..16 {
			let obj = alloc_pair(&mut pages).unwrap();
			pages.sweep(&mut |dead| {
				assert_eq!(dead as usize, obj.as_usize());
				unsafe { drop_in_place(dead) }
			});
		}
		assert_eq!(pages.page_count(), 1);

		pages.close(&allocator);
	}

	#[test]
	fn free_list_smoke() {
		backend_smoke(GcBackend::FreeList);
	}

	#[test]
	fn bitmap_smoke() {
		backend_smoke(GcBackend::Bitmap);
	}

	fn backend_fills_pages(backend: GcBackend) {
		let allocator = Allocator::new(default_allocf, ptr::null_mut());
		let mut pages = Pages::open(backend, &allocator);
		pages.morecore(&allocator);

		//fill the page, then verify that sweep reclaims every cell
		let mut live = Vec::new();
		while let Some(obj) = alloc_pair(&mut pages) {
			live.push(obj);
		}
		assert!(live.len() > 100);

		let mut finalized = 0;
		let (inuse, _) = pages.sweep(&mut |obj| {
			finalized += 1;
			unsafe { drop_in_place(obj) }
		});
		assert_eq!(finalized, live.len());
		assert_eq!(inuse, 0);

		//the page is whole again: it must hold at least as many cells as before
		let mut count = 0;
		while alloc_pair(&mut pages).is_some() {
			count += 1;
		}
		assert!(count >= live.len());

		pages.sweep(&mut |obj| unsafe { drop_in_place(obj) });
		pages.close(&allocator);
	}

	#[test]
	fn free_list_fills_pages() {
		backend_fills_pages(GcBackend::FreeList);
	}

	#[test]
	fn bitmap_fills_pages() {
		backend_fills_pages(GcBackend::Bitmap);
	}
}
