use serde_json::Value;
use shared::protocol::StateMap;

/// Accumulated experiment state.
///
/// Writes are staged with [`Datastore::set`] and only become visible once
/// [`Datastore::commit`] folds them into the committed map.
#[derive(Debug, Default, Clone)]
pub struct Datastore {
    committed: StateMap,
    staged: StateMap,
    commits: u64,
}

impl Datastore {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.staged.insert(key.into(), value.into());
    }

    pub fn stage_all(&mut self, frame: StateMap) {
        self.staged.extend(frame);
    }

    /// Folds every staged key into the committed state and returns a snapshot.
    pub fn commit(&mut self) -> StateMap {
        let staged = std::mem::take(&mut self.staged);
        self.committed.extend(staged);
        self.commits += 1;
        self.committed.clone()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.committed.get(key)
    }

    pub fn snapshot(&self) -> StateMap {
        self.committed.clone()
    }

    pub fn commit_count(&self) -> u64 {
        self.commits
    }
}
