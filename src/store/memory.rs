use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::hal::ByteStore;

/// In-memory byte store.
///
/// Clones share the same cells, so a handle kept outside the
/// [`ParameterStore`](super::ParameterStore) can inspect writes and inject
/// faults.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cells: Rc<RefCell<Cells>>,
}

#[derive(Debug)]
struct Cells {
    bytes: Vec<u8>,
    writes: usize,
    protected: bool,
    stuck: HashSet<u16>,
}

impl MemoryStore {
    /// Zero-filled store of `size` bytes
    pub fn new(size: usize) -> Self {
        MemoryStore {
            cells: Rc::new(RefCell::new(Cells {
                bytes: vec![0; size],
                writes: 0,
                protected: true,
                stuck: HashSet::new(),
            })),
        }
    }

    /// Number of byte writes that reached the cells
    pub fn writes(&self) -> usize {
        self.cells.borrow().writes
    }

    /// Read a byte without going through the store interface
    pub fn peek(&self, addr: u16) -> u8 {
        self.cells
            .borrow()
            .bytes
            .get(addr as usize)
            .copied()
            .unwrap_or(0xFF)
    }

    /// Overwrite a byte without counting a write (simulated corruption)
    pub fn poke(&self, addr: u16, value: u8) {
        if let Some(cell) = self.cells.borrow_mut().bytes.get_mut(addr as usize) {
            *cell = value;
        }
    }

    /// Make writes to `addr` silently fail
    pub fn stick(&self, addr: u16) {
        self.cells.borrow_mut().stuck.insert(addr);
    }

    /// Let writes to `addr` land again
    pub fn unstick(&self, addr: u16) {
        self.cells.borrow_mut().stuck.remove(&addr);
    }
}

impl ByteStore for MemoryStore {
    fn read_byte(&mut self, addr: u16) -> u8 {
        self.peek(addr)
    }

    fn write_byte(&mut self, addr: u16, value: u8) {
        let mut cells = self.cells.borrow_mut();
        if cells.protected || cells.stuck.contains(&addr) {
            return;
        }
        if let Some(cell) = cells.bytes.get_mut(addr as usize) {
            *cell = value;
            cells.writes += 1;
        }
    }

    fn set_write_protect(&mut self, protected: bool) {
        self.cells.borrow_mut().protected = protected;
    }
}
