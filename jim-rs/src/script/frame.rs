//! Call frames and variable cells.
//!
//! Frames live in a pooled arena indexed by `usize`; index 0 is the global
//! frame and is never released.  A released frame is cleared and kept for
//! reuse, and both of its stamps change:
//!
//! * `id` is stamped into variable lookups cached on name values, so a
//!   reused (or unset-invalidated) frame never answers a stale cache hit;
//! * `generation` is stored in [`FrameRef`]s held by `upvar` links, so a
//!   link into a frame that has since returned is detected instead of
//!   silently reading its successor.

use std::cell::RefCell;
use std::rc::Rc;

use crate::hash::HashTable;

use super::command::Command;
use super::value::Value;

pub(crate) type VarCell = Rc<RefCell<Var>>;

/// Frame index plus the generation it had when the reference was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameRef {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum Var {
    Value(Value),
    /// Alias to a variable in another frame, created by `upvar` and
    /// `global`.  Always points at a plain variable (or a vacant name),
    /// never at another link.
    Link { frame: FrameRef, name: Rc<str> },
}

impl Var {
    pub(crate) fn cell(value: Value) -> VarCell {
        Rc::new(RefCell::new(Var::Value(value)))
    }
}

pub(crate) type VarTable = HashTable<Rc<str>, VarCell>;

/// One procedure activation (or the global scope).
pub(crate) struct CallFrame {
    pub(crate) id: u64,
    pub(crate) generation: u64,
    pub(crate) vars: VarTable,
    /// The frame that was current when this one was entered.
    pub(crate) parent: usize,
    /// Nesting level, 0 for the global frame.
    pub(crate) level: usize,
    /// The running procedure, `None` for the global frame.
    pub(crate) proc: Option<Rc<Command>>,
    /// Arguments of the invocation, used by `info level` and traces.
    pub(crate) argv: Vec<Value>,
    /// Scripts registered by `defer`, run newest first on exit.
    pub(crate) defers: Vec<Value>,
    /// Commands created under `local`, restored on exit.
    pub(crate) local_cmds: Vec<Rc<str>>,
}

impl CallFrame {
    fn new(id: u64, salt: u64) -> Self {
        CallFrame {
            id,
            generation: 0,
            vars: HashTable::with_salt(salt),
            parent: 0,
            level: 0,
            proc: None,
            argv: Vec::new(),
            defers: Vec::new(),
            local_cmds: Vec::new(),
        }
    }

    /// Name the frame was invoked by, empty for the global frame.
    pub(crate) fn proc_name(&self) -> Rc<str> {
        match (&self.proc, self.argv.first()) {
            (Some(_), Some(name)) => name.as_str(),
            _ => Rc::from(""),
        }
    }
}

pub(crate) struct FramePool {
    frames: Vec<CallFrame>,
    free: Vec<usize>,
    next_id: u64,
    salt: u64,
}

impl FramePool {
    pub(crate) const GLOBAL: usize = 0;

    pub(crate) fn new(salt: u64) -> Self {
        FramePool {
            frames: vec![CallFrame::new(1, salt)],
            free: Vec::new(),
            next_id: 2,
            salt,
        }
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Activates a frame, reusing a released one when available.
    pub(crate) fn alloc(&mut self, parent: usize, proc: Rc<Command>, argv: Vec<Value>) -> usize {
        let level = self.frames[parent].level + 1;
        let id = self.fresh_id();
        let index = match self.free.pop() {
            Some(index) => {
                self.frames[index].id = id;
                index
            }
            None => {
                self.frames.push(CallFrame::new(id, self.salt));
                self.frames.len() - 1
            }
        };
        let frame = &mut self.frames[index];
        frame.parent = parent;
        frame.level = level;
        frame.proc = Some(proc);
        frame.argv = argv;
        index
    }

    /// Returns a frame to the pool.  Its variables are dropped and every
    /// outstanding cache entry and link into it goes stale.
    pub(crate) fn release(&mut self, index: usize) {
        if index == Self::GLOBAL {
            return;
        }
        let id = self.fresh_id();
        let frame = &mut self.frames[index];
        frame.vars.clear();
        frame.id = id;
        frame.generation += 1;
        frame.proc = None;
        frame.argv.clear();
        frame.defers.clear();
        frame.local_cmds.clear();
        self.free.push(index);
    }

    /// Gives a frame a new id, invalidating variable lookups cached
    /// against it.
    pub(crate) fn renew_id(&mut self, index: usize) {
        let id = self.fresh_id();
        self.frames[index].id = id;
    }

    pub(crate) fn get(&self, index: usize) -> &CallFrame {
        &self.frames[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut CallFrame {
        &mut self.frames[index]
    }

    pub(crate) fn frame_ref(&self, index: usize) -> FrameRef {
        FrameRef {
            index,
            generation: self.frames[index].generation,
        }
    }

    /// The frame a reference points to, if it is still the same activation.
    pub(crate) fn resolve(&self, r: FrameRef) -> Option<usize> {
        let frame = self.frames.get(r.index)?;
        (frame.generation == r.generation).then_some(r.index)
    }

    /// Number of frames ever allocated, live or pooled.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.frames.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::command::{Command, CommandKind};

    fn dummy_cmd() -> Rc<Command> {
        Rc::new(Command::new(
            CommandKind::Native(Box::new(|_: &mut crate::script::Interpreter, _: &[Value]| -> crate::script::EvalResult {
                Ok(Value::empty())
            })),
            None,
        ))
    }

    #[test]
    fn released_frames_are_reused_with_new_stamps() {
        let mut pool = FramePool::new(0);
        let a = pool.alloc(FramePool::GLOBAL, dummy_cmd(), vec![Value::from("f")]);
        let (id, r) = (pool.get(a).id, pool.frame_ref(a));
        pool.get_mut(a)
            .vars
            .replace(Rc::from("x"), Var::cell(Value::from(1i64)));
        pool.release(a);

        let b = pool.alloc(FramePool::GLOBAL, dummy_cmd(), vec![Value::from("g")]);
        assert_eq!(a, b);
        assert_ne!(pool.get(b).id, id);
        assert!(pool.get(b).vars.is_empty());
        assert_eq!(pool.resolve(r), None);
        assert_eq!(pool.resolve(pool.frame_ref(b)), Some(b));
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn levels_follow_the_parent() {
        let mut pool = FramePool::new(0);
        let a = pool.alloc(FramePool::GLOBAL, dummy_cmd(), vec![Value::from("f")]);
        let b = pool.alloc(a, dummy_cmd(), vec![Value::from("g")]);
        assert_eq!(pool.get(a).level, 1);
        assert_eq!(pool.get(b).level, 2);
        assert_eq!(pool.get(b).parent, a);
        assert_eq!(&*pool.get(b).proc_name(), "g");
        assert_eq!(&*pool.get(FramePool::GLOBAL).proc_name(), "");
    }

    #[test]
    fn global_frame_is_never_released() {
        let mut pool = FramePool::new(0);
        let before = pool.frame_ref(FramePool::GLOBAL);
        pool.release(FramePool::GLOBAL);
        assert_eq!(pool.resolve(before), Some(FramePool::GLOBAL));
    }

    #[test]
    fn renewing_the_id_keeps_the_generation() {
        let mut pool = FramePool::new(0);
        let r = pool.frame_ref(FramePool::GLOBAL);
        let id = pool.get(FramePool::GLOBAL).id;
        pool.renew_id(FramePool::GLOBAL);
        assert_ne!(pool.get(FramePool::GLOBAL).id, id);
        assert_eq!(pool.resolve(r), Some(FramePool::GLOBAL));
    }
}
