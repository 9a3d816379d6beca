use bytes::Bytes;

/// A single decoded request.
///
/// Each argument slot is either absent (a null bulk, `$-1`), empty (`$0`), or
/// carries bytes. Slot 0 is conventionally the command name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    argv: Vec<Option<Bytes>>,
}

impl Command {
    pub fn new(argv: Vec<Option<Bytes>>) -> Self {
        Self { argv }
    }

    /// Build a command from present arguments only. Mostly useful in tests and
    /// when forwarding requests to a backend.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self {
            argv: args
                .into_iter()
                .map(|a| Some(Bytes::copy_from_slice(a.as_ref())))
                .collect(),
        }
    }

    /// Raw slot access. Out-of-range indexes read as absent.
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.argv.get(index).and_then(|slot| slot.as_ref())
    }

    /// Returns `true` if the slot exists and holds a null bulk.
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.argv.get(index), Some(None))
    }

    /// Lossy UTF-8 view of an argument; absent slots read as an empty string.
    pub fn get_str(&self, index: usize) -> String {
        self.get(index)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// Upper-cased command name used for dispatch.
    pub fn name(&self) -> String {
        self.get_str(0).to_ascii_uppercase()
    }

    pub fn arg_count(&self) -> usize {
        self.argv.len()
    }

    pub fn args(&self) -> &[Option<Bytes>] {
        &self.argv
    }
}
