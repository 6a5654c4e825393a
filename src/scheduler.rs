// The MIT License (MIT)

// Copyright (c) 2025 braid developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Scheduler: a directory of executors.
//!
//! A product of executor instances, immutable after construction, indexable
//! by executor type or by type plus positional index (for worker groups).
//! `SchedulerRef` is the type-erased form carried by every computation.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use crate::error::SchedulerError;
use crate::executor::{Executor, ExecutorRef, IndexedExecutor};

struct Entry {
    key: TypeId,
    name: &'static str,
    executor: ExecutorRef,
    concrete: Arc<dyn Any + Send + Sync>,
}

pub struct Scheduler {
    entries: Vec<Entry>,
}

pub type SchedulerRef = Arc<Scheduler>;

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            entries: Vec::new(),
        }
    }

    /// Add an executor instance to the directory. One instance per executor
    /// type; a later instance of the same type shadows the earlier one for
    /// lookups, matching the first-match scan order below.
    pub fn with<E: Executor>(mut self, executor: E) -> Scheduler {
        let concrete = Arc::new(executor);
        self.entries.insert(
            0,
            Entry {
                key: TypeId::of::<E>(),
                name: type_name::<E>(),
                executor: concrete.clone() as ExecutorRef,
                concrete: concrete as Arc<dyn Any + Send + Sync>,
            },
        );
        self
    }

    pub fn into_ref(self) -> SchedulerRef {
        Arc::new(self)
    }

    fn entry(&self, key: TypeId) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    /// Look an executor up by type.
    pub fn find<E: Executor>(&self) -> Result<ExecutorRef, SchedulerError> {
        self.entry(TypeId::of::<E>())
            .map(|entry| entry.executor.clone())
            .ok_or(SchedulerError::ExecutorNotFound(type_name::<E>()))
    }

    /// Look an executor up by type, keeping its concrete type.
    pub fn find_concrete<E: Executor>(&self) -> Result<Arc<E>, SchedulerError> {
        let entry = self
            .entry(TypeId::of::<E>())
            .ok_or(SchedulerError::ExecutorNotFound(type_name::<E>()))?;
        entry
            .concrete
            .clone()
            .downcast::<E>()
            .map_err(|_| SchedulerError::ExecutorNotFound(type_name::<E>()))
    }

    /// Look a member of an indexed executor up by type and position.
    pub fn find_at<E: IndexedExecutor>(
        &self,
        pos: usize,
    ) -> Result<ExecutorRef, SchedulerError> {
        let group = self.find_concrete::<E>()?;
        group
            .member(pos)
            .ok_or(SchedulerError::ExecutorNotFound(type_name::<E>()))
    }

    /// The `TypeId` key an executor type is filed under.
    pub fn tag<E: Executor>() -> TypeId {
        TypeId::of::<E>()
    }

    /// A sub-directory over the same executor instances, restricted to the
    /// given keys. Used when a child computation wants to narrow its view.
    pub fn narrowed(&self, keys: &[TypeId]) -> Scheduler {
        Scheduler {
            entries: self
                .entries
                .iter()
                .filter(|entry| keys.contains(&entry.key))
                .map(|entry| Entry {
                    key: entry.key,
                    name: entry.name,
                    executor: entry.executor.clone(),
                    concrete: entry.concrete.clone(),
                })
                .collect(),
        }
    }

    /// Names of the registered executors, in lookup order.
    pub fn executor_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::{NoopExecutor, TimerExecutor, WorkerGroup};

    #[test]
    fn test_find_by_type() {
        let scheduler = Scheduler::new().with(NoopExecutor).with(TimerExecutor::new());
        assert!(scheduler.find::<NoopExecutor>().is_ok());
        assert!(scheduler.find_concrete::<TimerExecutor>().is_ok());
        assert!(matches!(
            scheduler.find::<WorkerGroup>(),
            Err(SchedulerError::ExecutorNotFound(_))
        ));
    }

    #[test]
    fn test_find_group_member() {
        let scheduler = Scheduler::new().with(WorkerGroup::new(2));
        assert!(scheduler.find_at::<WorkerGroup>(0).is_ok());
        assert!(scheduler.find_at::<WorkerGroup>(1).is_ok());
        assert!(scheduler.find_at::<WorkerGroup>(2).is_err());
    }

    #[test]
    fn test_narrowed_shares_instances() {
        let scheduler = Scheduler::new().with(NoopExecutor).with(TimerExecutor::new());
        let narrowed = scheduler.narrowed(&[Scheduler::tag::<NoopExecutor>()]);
        assert!(narrowed.find::<NoopExecutor>().is_ok());
        assert!(narrowed.find::<TimerExecutor>().is_err());
    }
}
