use super::JobHandle;
use crate::error::FerryError;

/// Schedules the same operation over many items behind one dependency and
/// joins the results into a single handle.
#[derive(Debug)]
pub struct BulkScheduler<T> {
    items: Vec<T>,
}

impl<T> BulkScheduler<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Call `schedule` for every item with `deps` and combine the handles.
    /// An empty scheduler passes `deps` through.
    pub fn schedule<F>(&mut self, deps: &JobHandle, mut schedule: F) -> Result<JobHandle, FerryError>
    where
        F: FnMut(&mut T, &JobHandle) -> Result<JobHandle, FerryError>,
    {
        if self.items.is_empty() {
            return Ok(deps.clone());
        }
        let handles = self
            .items
            .iter_mut()
            .map(|item| schedule(item, deps))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobHandle::combine(&handles))
    }
}

impl<T> Default for BulkScheduler<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> FromIterator<T> for BulkScheduler<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    #[test]
    fn empty_scheduler_passes_dependency_through() {
        let deps = JobHandle::completed();
        let mut bulk: BulkScheduler<u32> = BulkScheduler::default();
        let out = bulk.schedule(&deps, |_, _| unreachable!()).unwrap();
        assert!(out.ptr_eq(&deps));
    }

    #[test]
    fn every_item_is_scheduled_and_errors_stop_the_bulk() {
        let mut bulk: BulkScheduler<u32> = (0..4).collect();
        let mut visited = Vec::new();
        let out = bulk
            .schedule(&JobHandle::completed(), |item, deps| {
                visited.push(*item);
                Ok(deps.clone())
            })
            .unwrap();
        assert!(out.is_complete());
        assert_eq!(visited, vec![0, 1, 2, 3]);

        let err = bulk
            .schedule(&JobHandle::completed(), |item, deps| {
                if *item == 2 {
                    Err(GraphError::NotHardened.into())
                } else {
                    Ok(deps.clone())
                }
            })
            .unwrap_err();
        assert_eq!(err, FerryError::from(GraphError::NotHardened));
    }
}
