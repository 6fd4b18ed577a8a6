use std::collections::HashMap;

use crate::token::TokenType;

/// Interned identifier handle. Comparing two symbols is an integer compare
/// regardless of how long the underlying identifiers are.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Symbol(u32);

impl Symbol {
    pub const EMPTY: Symbol = Symbol(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Identifier interner. Slot 0 is the empty string, and every keyword and
/// suppressible type name is interned up front, so those symbols are the
/// same small integers in every interner regardless of input.
pub struct Interner {
    ids: HashMap<Box<str>, u32>,
    spellings: Vec<Box<str>>,
}

/// Spellings loaded into every fresh interner, after the empty slot.
const PRELOADED: usize = 1;

impl Interner {
    pub fn new() -> Self {
        let mut interner = Interner {
            ids: HashMap::new(),
            spellings: Vec::with_capacity(
                PRELOADED + TokenType::KEYWORDS.len() + TokenType::TYPE_NAMES.len(),
            ),
        };
        interner.intern("");
        for word in TokenType::KEYWORDS {
            interner.intern(word);
        }
        for word in TokenType::TYPE_NAMES {
            interner.intern(word);
        }
        interner
    }

    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(&id) = self.ids.get(text) {
            return Symbol(id);
        }
        let id = self.spellings.len() as u32;
        let spelling: Box<str> = text.into();
        self.spellings.push(spelling.clone());
        self.ids.insert(spelling, id);
        Symbol(id)
    }

    /// Spelling of a symbol; unknown handles read as the empty string.
    pub fn resolve(&self, symbol: Symbol) -> &str {
        self.spellings
            .get(symbol.index())
            .map(|s| s.as_ref())
            .unwrap_or("")
    }

    /// Existing symbol for `text`, without creating a new entry.
    pub fn lookup(&self, text: &str) -> Option<Symbol> {
        self.ids.get(text).map(|&id| Symbol(id))
    }

    /// Every interned (symbol, spelling) pair in interning order. The
    /// diagnostics paths walk this as the near-miss candidate pool.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &str)> {
        self.spellings
            .iter()
            .enumerate()
            .map(|(i, s)| (Symbol(i as u32), s.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.spellings.len()
    }

    /// True while only the preloaded block (empty slot, keywords, type
    /// names) is present.
    pub fn is_empty(&self) -> bool {
        self.spellings.len()
            <= PRELOADED + TokenType::KEYWORDS.len() + TokenType::TYPE_NAMES.len()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}
