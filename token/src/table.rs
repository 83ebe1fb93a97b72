use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use hashbrown::HashMap;

/// Interned string handle.
///
/// Two tokens are equal when their ids are equal. The name is owned by the token itself, so a
/// token stays readable after the table that produced it grows or is cleared.
#[derive(Clone)]
pub struct Token {
    id: u64,
    name: Arc<str>,
}

impl Token {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}, {:?})", self.id, &*self.name)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Compares two optional tokens by id. Two missing tokens are equal.
pub fn tokens_equal(a: Option<&Token>, b: Option<&Token>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.id == b.id,
        (None, None) => true,
        _ => false,
    }
}

struct Tables {
    by_name: HashMap<Arc<str>, Token>,
    // Index is id - 1.
    by_id: Vec<Token>,
    next_id: u64,
}

impl Tables {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: Vec::new(),
            next_id: 1,
        }
    }
}

/// Thread-safe string interner handing out stable 64-bit ids, starting at 1.
pub struct TokenTable {
    tables: RwLock<Tables>,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenTable {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
        }
    }

    /// Returns the token for `name`, interning it on first use.
    pub fn get_or_create(&self, name: &str) -> Token {
        {
            let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = tables.by_name.get(name) {
                return token.clone();
            }
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        // Another thread may have interned the name between the two locks.
        if let Some(token) = tables.by_name.get(name) {
            return token.clone();
        }

        let name: Arc<str> = Arc::from(name);
        let token = Token {
            id: tables.next_id,
            name: name.clone(),
        };
        tables.next_id += 1;
        tables.by_id.push(token.clone());
        tables.by_name.insert(name, token.clone());
        tracing::trace!("Interned token {:?}", token);
        token
    }

    /// Looks a name up without interning it.
    pub fn get(&self, name: &str) -> Option<Token> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.by_name.get(name).cloned()
    }

    pub fn get_by_id(&self, id: u64) -> Option<Token> {
        if id == 0 {
            return None;
        }
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.by_id.get((id - 1) as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every interned string and restarts ids at 1.
    pub fn clear(&self) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        *tables = Tables::new();
    }
}
