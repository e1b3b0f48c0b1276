//! Execution shapes shared by agents (engine sequences) and pipes (agent sequences).

use std::future::Future;

use futures::future::join_all;

/// How a batch of members is added to a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuteType {
    /// Each member becomes its own step, run one after another.
    #[default]
    Sequence,
    /// All members form one step and run concurrently.
    Parallel,
}

/// One element of an ordered sequence.
#[derive(Debug, Clone)]
pub enum Step<T> {
    Single(T),
    Parallel(Vec<T>),
}

impl<T> Step<T> {
    pub fn members(&self) -> &[T] {
        match self {
            Step::Single(member) => std::slice::from_ref(member),
            Step::Parallel(members) => members,
        }
    }
}

/// Append `members` to `steps` according to `execute_type`.
///
/// An empty parallel batch adds nothing.
pub fn push_members<T>(steps: &mut Vec<Step<T>>, members: Vec<T>, execute_type: ExecuteType) {
    match execute_type {
        ExecuteType::Sequence => steps.extend(members.into_iter().map(Step::Single)),
        ExecuteType::Parallel => {
            if !members.is_empty() {
                steps.push(Step::Parallel(members));
            }
        }
    }
}

/// Fan out every future, wait for all of them to settle, and fan back in.
///
/// Results keep declared order regardless of completion order. If any member
/// failed, the first failure in declared order is returned, but only after
/// every sibling has finished.
pub async fn join_group<I, F, T, E>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    join_all(futures).await.into_iter().collect()
}
