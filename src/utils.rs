//! Small helpers shared across the stream and driver modules.

/// Panics with a message naming the unexpected variant. Used in `match`
/// arms over [`crate::indexer::Current`] that are structurally unreachable,
/// so that adding a fifth state is a compile error at every call site that
/// enumerates the others explicitly, rather than a silently-wrong fallthrough.
#[track_caller]
pub fn unreachable_variant(what: &str) -> ! {
    unreachable!("exhaustive match over {what} hit an unhandled variant")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "exhaustive match over Current")]
    fn unreachable_variant_panics_with_context() {
        unreachable_variant("Current");
    }
}
