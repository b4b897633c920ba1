//! API-level requirements.

use crate::model::DexMethod;

/// Answers which Android API level a method requires.
///
/// Methods without an explicit requirement inherit the global minimum SDK. A callee that
/// requires a higher level than its caller may not be inlined into it: its body could
/// reference platform APIs the caller is not guarded for.
#[derive(Debug, Clone, Copy)]
pub struct ApiLevelChecker {
    min_sdk: i32,
}

impl Default for ApiLevelChecker {
    fn default() -> Self {
        ApiLevelChecker { min_sdk: 21 }
    }
}

impl ApiLevelChecker {
    /// Creates a checker for the given minimum SDK.
    #[must_use]
    pub fn new(min_sdk: i32) -> Self {
        ApiLevelChecker { min_sdk }
    }

    /// Returns the global minimum SDK.
    #[must_use]
    pub fn min_sdk(&self) -> i32 {
        self.min_sdk
    }

    /// Returns the API level `method` requires.
    #[must_use]
    pub fn method_level(&self, method: &DexMethod) -> i32 {
        method.api_level().map_or(self.min_sdk, |l| l.max(self.min_sdk))
    }
}
