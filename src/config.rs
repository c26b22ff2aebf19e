use mlua::StdLib;

/// Options for opening a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of values one boundary crossing may carry (arguments
    /// of a proxied call, its results, the results of an evaluation).
    /// `None` keeps the engine default, which is unbounded.
    pub stack_size: Option<usize>,
    /// Lua allocator limit in bytes.
    pub memory_limit: Option<usize>,
    /// Standard libraries opened in the state.
    pub libraries: StdLib,
    /// Chunk name used in Lua error messages.
    pub chunk_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stack_size: None,
            memory_limit: None,
            libraries: StdLib::ALL_SAFE,
            chunk_name: "=lua".to_string(),
        }
    }
}

impl SessionConfig {
    /// Set the stack size; zero or negative keeps the engine default.
    pub fn with_stack_size(mut self, stack_size: i64) -> Self {
        self.stack_size = usize::try_from(stack_size).ok().filter(|size| *size > 0);
        self
    }

    /// Set or clear the allocator limit.
    pub fn with_memory_limit(mut self, memory_limit: Option<usize>) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Set the chunk name reported in error messages.
    pub fn with_chunk_name(mut self, chunk_name: impl Into<String>) -> Self {
        self.chunk_name = chunk_name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_stack_size_means_default() {
        assert_eq!(SessionConfig::default().with_stack_size(0).stack_size, None);
        assert_eq!(SessionConfig::default().with_stack_size(-5).stack_size, None);
        assert_eq!(SessionConfig::default().with_stack_size(64).stack_size, Some(64));
    }
}
