//! Which earlier steps to replay before a range run.

use crate::execution::TestCase;

/// Decides the steps in `[0, from)` to replay silently before running a range
pub trait PrerequisitePolicy: Send + Sync {
    fn steps_to_replay(&self, test_case: &TestCase, from: usize, cursor: usize) -> Vec<usize>;
}

/// Replay steps flagged `prerequisite`, unless the range starts at 0 or the
/// session is already positioned at `from`
#[derive(Debug, Clone, Copy, Default)]
pub struct FlaggedPrerequisites;

impl PrerequisitePolicy for FlaggedPrerequisites {
    fn steps_to_replay(&self, test_case: &TestCase, from: usize, cursor: usize) -> Vec<usize> {
        if from == 0 || cursor == from {
            return Vec::new();
        }
        test_case
            .steps
            .iter()
            .enumerate()
            .take(from)
            .filter(|(_, step)| step.prerequisite)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Never replay; the caller positions the browser itself
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReplay;

impl PrerequisitePolicy for NeverReplay {
    fn steps_to_replay(&self, _test_case: &TestCase, _from: usize, _cursor: usize) -> Vec<usize> {
        Vec::new()
    }
}
