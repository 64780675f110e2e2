const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// Key types that bring their own stable 64-bit hash.
pub trait HashCode {
    fn hash_code(&self) -> u64;
}

/// Shard routing key of an entity.
///
/// Only integers, strings and [`HashCode`] implementors convert into a
/// `HashKey`, so an unsupported key type is a compile error rather than a
/// silently mis-routed op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(u64),
    Text(String),
    Custom(u64),
}

impl HashKey {
    pub fn custom<H: HashCode + ?Sized>(key: &H) -> Self {
        Self::Custom(key.hash_code())
    }

    /// Integers hash to their own value, strings through FNV-1a.
    pub fn hash_code(&self) -> u64 {
        match self {
            Self::Int(value) | Self::Custom(value) => *value,
            Self::Text(text) => fnv1a64(text.as_bytes()),
        }
    }

    /// Index of the worker that owns this key among `shards` workers.
    pub fn shard(&self, shards: usize) -> usize {
        if shards == 0 {
            return 0;
        }
        (self.hash_code() % shards as u64) as usize
    }
}

/// FNV-1a over raw bytes.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

macro_rules! int_hash_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for HashKey {
                fn from(value: $ty) -> Self {
                    Self::Int(value as u64)
                }
            }
        )*
    };
}

int_hash_key!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<&str> for HashKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HashKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for HashKey {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}
