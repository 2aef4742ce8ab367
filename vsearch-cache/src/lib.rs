//! Global interner for stimulus file paths and UI label strings.
//!
//! Interned ids are dense and stable for the lifetime of the process, which
//! makes them usable as keys into the render-side pixmap caches.

use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;
pub use string_cache::DefaultAtom as Atom;

lazy_static! {
    static ref INTERNER: RwLock<Interner> = RwLock::new(Interner::default());
}

#[derive(Default)]
struct Interner {
    ids: HashMap<Atom, usize>,
    entries: Vec<Atom>,
}

/// Intern a string and return its dense id. Interning the same string twice
/// returns the same id.
pub fn intern(s: &str) -> usize {
    let atom = Atom::from(s);
    if let Some(&id) = INTERNER.read().unwrap().ids.get(&atom) {
        return id;
    }
    let mut interner = INTERNER.write().unwrap();
    // Re-check under the write lock: another thread may have won the race.
    if let Some(&id) = interner.ids.get(&atom) {
        return id;
    }
    let id = interner.entries.len();
    interner.entries.push(atom.clone());
    interner.ids.insert(atom, id);
    id
}

/// Resolve an id back to the interned string, if it exists.
pub fn resolve(id: usize) -> Option<String> {
    INTERNER
        .read()
        .unwrap()
        .entries
        .get(id)
        .map(|a| a.to_string())
}

/// Number of unique strings interned so far.
pub fn len() -> usize {
    INTERNER.read().unwrap().entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_string_same_id() {
        let a = intern("stimuli/target/bird.png");
        let b = intern("stimuli/target/bird.png");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_strings_distinct_ids() {
        let a = intern("stimuli/target/one.png");
        let b = intern("stimuli/target/two.png");
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_round_trips() {
        let id = intern("Trial 3/10");
        assert_eq!(resolve(id).as_deref(), Some("Trial 3/10"));
    }

    #[test]
    fn resolve_unknown_id_is_none() {
        assert_eq!(resolve(usize::MAX), None);
    }
}
