//! Resource registry and allocation bookkeeping
//!
//! The registry is the single writer of `allocated`/`available`. All
//! matching for one request happens under one write lock, and a request whose
//! requirements cannot all be met has its partial grants rolled back before
//! the lock is released.

use super::{
    matcher::rank_candidates, queue::next_batch, Allocation, AllocationStatus, PoolSummary,
    RequestStatus, Resource, ResourcePool, ResourceRequest, ResourceStatus,
};
use crate::error::{ControllerError, Result};
use crate::span::MAX_SPAN_SECS;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Result of one matching attempt for a request
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Every requirement was granted
    Allocated(Vec<Allocation>),
    /// At least one requirement had no candidate; nothing was granted
    Unsatisfied {
        resource_type: String,
        reason: String,
    },
    /// The request is no longer pending
    NotPending(RequestStatus),
}

#[derive(Default)]
struct RegistryState {
    resources: BTreeMap<String, Resource>,
    allocations: BTreeMap<String, Allocation>,
    requests: HashMap<String, ResourceRequest>,
    pools: BTreeMap<String, ResourcePool>,
    next_allocation: u64,
}

impl RegistryState {
    fn active_allocations_for<'a>(
        &'a self,
        request_id: &'a str,
    ) -> impl Iterator<Item = &'a Allocation> + 'a {
        self.allocations
            .values()
            .filter(move |a| a.request_id == request_id && a.is_active())
    }

    /// Return capacity to the resource and mark the allocation with `status`
    fn finish_allocation(
        &mut self,
        allocation_id: &str,
        status: AllocationStatus,
        now: DateTime<Utc>,
    ) -> Option<Allocation> {
        let allocation = self.allocations.get_mut(allocation_id)?;
        if !allocation.is_active() {
            return None;
        }
        allocation.status = status;
        if status != AllocationStatus::Active {
            allocation.end_time = Some(allocation.end_time.map_or(now, |end| end.min(now)));
        }
        let finished = allocation.clone();

        if let Some(resource) = self.resources.get_mut(&finished.resource_id) {
            resource.restore(finished.amount, now);
        }
        Some(finished)
    }
}

/// Catalog of typed resources, their allocations and pending requests
#[derive(Default)]
pub struct ResourceRegistry {
    state: RwLock<RegistryState>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a resource. `available` is derived from capacity and allocation.
    pub fn add_resource(&self, mut resource: Resource) -> Result<()> {
        if resource.capacity_total < 0.0 {
            return Err(ControllerError::InvalidConfig(format!(
                "resource {} has negative capacity",
                resource.id
            )));
        }
        resource.allocated = resource.allocated.max(0.0);
        if resource.allocated > resource.capacity_total {
            return Err(ControllerError::CapacityBelowAllocated {
                resource_id: resource.id,
                requested: resource.capacity_total,
                allocated: resource.allocated,
            });
        }
        resource.available = resource.capacity_total - resource.allocated;

        let mut state = self.write();
        if state.resources.contains_key(&resource.id) {
            return Err(ControllerError::DuplicateResource(resource.id));
        }
        info!(
            resource_id = %resource.id,
            resource_type = %resource.resource_type,
            capacity = resource.capacity_total,
            "Registered resource"
        );
        state.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Remove a resource that has no active allocations
    pub fn remove_resource(&self, resource_id: &str) -> Result<Resource> {
        let mut state = self.write();
        if !state.resources.contains_key(resource_id) {
            return Err(ControllerError::ResourceNotFound(resource_id.to_string()));
        }
        let in_use = state
            .allocations
            .values()
            .any(|a| a.resource_id == resource_id && a.is_active());
        if in_use {
            return Err(ControllerError::ResourceInUse(resource_id.to_string()));
        }

        for pool in state.pools.values_mut() {
            pool.resource_ids.retain(|id| id != resource_id);
        }
        let removed = state
            .resources
            .remove(resource_id)
            .ok_or_else(|| ControllerError::ResourceNotFound(resource_id.to_string()))?;
        info!(resource_id = %resource_id, "Removed resource");
        Ok(removed)
    }

    /// Apply a capacity change reported by the provisioning collaborator
    pub fn update_capacity(
        &self,
        resource_id: &str,
        capacity_total: f64,
        now: DateTime<Utc>,
    ) -> Result<Resource> {
        let mut state = self.write();
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| ControllerError::ResourceNotFound(resource_id.to_string()))?;

        if capacity_total < resource.allocated {
            return Err(ControllerError::CapacityBelowAllocated {
                resource_id: resource_id.to_string(),
                requested: capacity_total,
                allocated: resource.allocated,
            });
        }
        debug!(
            resource_id = %resource_id,
            from = resource.capacity_total,
            to = capacity_total,
            "Updating resource capacity"
        );
        resource.capacity_total = capacity_total;
        resource.available = capacity_total - resource.allocated;
        resource.last_updated = now;
        Ok(resource.clone())
    }

    pub fn set_status(
        &self,
        resource_id: &str,
        status: ResourceStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.write();
        let resource = state
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| ControllerError::ResourceNotFound(resource_id.to_string()))?;
        if resource.status != status {
            info!(resource_id = %resource_id, status = %status, "Resource status changed");
        }
        resource.status = status;
        resource.last_updated = now;
        Ok(())
    }

    pub fn get_resource(&self, resource_id: &str) -> Option<Resource> {
        self.read().resources.get(resource_id).cloned()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.read().resources.values().cloned().collect()
    }

    /// Group existing resources under a pool
    pub fn create_resource_pool(
        &self,
        pool_id: impl Into<String>,
        name: impl Into<String>,
        resource_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<ResourcePool> {
        let pool_id = pool_id.into();
        let mut state = self.write();
        if state.pools.contains_key(&pool_id) {
            return Err(ControllerError::InvalidConfig(format!(
                "resource pool {} already exists",
                pool_id
            )));
        }
        if let Some(missing) = resource_ids.iter().find(|id| !state.resources.contains_key(*id)) {
            return Err(ControllerError::ResourceNotFound(missing.clone()));
        }

        let mut seen = BTreeSet::new();
        let resource_ids: Vec<String> = resource_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let pool = ResourcePool {
            id: pool_id.clone(),
            name: name.into(),
            resource_ids,
            created_at: now,
        };
        info!(pool_id = %pool_id, resources = pool.resource_ids.len(), "Created resource pool");
        state.pools.insert(pool_id, pool.clone());
        Ok(pool)
    }

    pub fn remove_resource_pool(&self, pool_id: &str) -> Result<ResourcePool> {
        self.write()
            .pools
            .remove(pool_id)
            .ok_or_else(|| ControllerError::PoolNotFound(pool_id.to_string()))
    }

    pub fn list_pools(&self) -> Vec<ResourcePool> {
        self.read().pools.values().cloned().collect()
    }

    /// Aggregate capacity of the resources in a pool
    pub fn pool_summary(&self, pool_id: &str) -> Result<PoolSummary> {
        let state = self.read();
        let pool = state
            .pools
            .get(pool_id)
            .ok_or_else(|| ControllerError::PoolNotFound(pool_id.to_string()))?;

        let members: Vec<&Resource> = pool
            .resource_ids
            .iter()
            .filter_map(|id| state.resources.get(id))
            .collect();
        let capacity_total: f64 = members.iter().map(|r| r.capacity_total).sum();
        let allocated: f64 = members.iter().map(|r| r.allocated).sum();
        let available: f64 = members.iter().map(|r| r.available).sum();

        Ok(PoolSummary {
            pool_id: pool_id.to_string(),
            resources: members.len(),
            capacity_total,
            allocated,
            available,
            utilization: if capacity_total > 0.0 {
                allocated / capacity_total
            } else {
                0.0
            },
        })
    }

    /// Store a new request as pending
    pub fn submit_request(&self, mut request: ResourceRequest) -> Result<()> {
        if request.requirements.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "request {} has no requirements",
                request.id
            )));
        }
        if let Some(bad) = request.requirements.iter().find(|r| r.amount <= 0.0) {
            return Err(ControllerError::InvalidConfig(format!(
                "request {} asks for non-positive amount of {}",
                request.id, bad.resource_type
            )));
        }
        if let Some(bad) = request
            .requirements
            .iter()
            .find(|r| r.duration_secs.map_or(false, |secs| secs > MAX_SPAN_SECS))
        {
            return Err(ControllerError::InvalidConfig(format!(
                "request {} holds {} for longer than {}s",
                request.id, bad.resource_type, MAX_SPAN_SECS
            )));
        }

        let mut state = self.write();
        if state.requests.contains_key(&request.id) {
            return Err(ControllerError::InvalidConfig(format!(
                "request {} already exists",
                request.id
            )));
        }
        request.status = RequestStatus::Pending;
        request.reason = None;
        debug!(
            request_id = %request.id,
            priority = ?request.priority,
            requirements = request.requirements.len(),
            "Request submitted"
        );
        state.requests.insert(request.id.clone(), request);
        Ok(())
    }

    /// Try to satisfy every requirement of a pending request, all-or-nothing
    pub fn try_allocate(&self, request_id: &str, now: DateTime<Utc>) -> Result<MatchOutcome> {
        let mut guard = self.write();
        let state = &mut *guard;

        let request = state
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| ControllerError::RequestNotFound(request_id.to_string()))?;
        if request.status != RequestStatus::Pending {
            return Ok(MatchOutcome::NotPending(request.status));
        }

        let mut granted: Vec<Allocation> = Vec::with_capacity(request.requirements.len());
        for requirement in &request.requirements {
            let ranked = rank_candidates(
                state.resources.values(),
                requirement,
                &request.constraints,
                &request.preferences,
            );

            let Some(best) = ranked.into_iter().next() else {
                roll_back(state, request_id, &granted, now);
                return Ok(MatchOutcome::Unsatisfied {
                    resource_type: requirement.resource_type.clone(),
                    reason: format!(
                        "no eligible {} resource with {} {} available",
                        requirement.resource_type, requirement.amount, requirement.unit
                    ),
                });
            };

            // Settle everything fallible before capacity moves
            let end_time = match Allocation::end_time_for(now, requirement.duration_secs) {
                Ok(end_time) => end_time,
                Err(e) => {
                    roll_back(state, request_id, &granted, now);
                    warn!(request_id = %request_id, error = %e, "Request cannot be allocated");
                    if let Some(request) = state.requests.get_mut(request_id) {
                        request.status = RequestStatus::Failed;
                        request.reason = Some(e.to_string());
                    }
                    return Ok(MatchOutcome::NotPending(RequestStatus::Failed));
                }
            };
            let allocation = Allocation {
                id: format!("alloc-{}", state.next_allocation + 1),
                request_id: request_id.to_string(),
                resource_id: best.resource_id,
                amount: best.amount,
                unit: requirement.unit.clone(),
                start_time: now,
                end_time,
                status: AllocationStatus::Active,
            };
            state.next_allocation += 1;
            if let Some(resource) = state.resources.get_mut(&allocation.resource_id) {
                resource.commit(allocation.amount, now);
            }
            state.allocations.insert(allocation.id.clone(), allocation.clone());
            granted.push(allocation);
        }

        if let Some(request) = state.requests.get_mut(request_id) {
            request.status = RequestStatus::Allocated;
            request.reason = None;
        }
        info!(
            request_id = %request_id,
            allocations = granted.len(),
            "Request allocated"
        );
        Ok(MatchOutcome::Allocated(granted))
    }

    /// Set a terminal (or back-to-pending) status on a request
    pub fn mark_request(
        &self,
        request_id: &str,
        status: RequestStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut state = self.write();
        let request = state
            .requests
            .get_mut(request_id)
            .ok_or_else(|| ControllerError::RequestNotFound(request_id.to_string()))?;
        request.status = status;
        request.reason = reason;
        Ok(())
    }

    /// Release every active allocation of a request and mark it completed
    pub fn release_request(&self, request_id: &str, now: DateTime<Utc>) -> Result<Vec<Allocation>> {
        let mut state = self.write();
        if !state.requests.contains_key(request_id) {
            return Err(ControllerError::RequestNotFound(request_id.to_string()));
        }

        let ids: Vec<String> = state
            .active_allocations_for(request_id)
            .map(|a| a.id.clone())
            .collect();
        let released: Vec<Allocation> = ids
            .iter()
            .filter_map(|id| state.finish_allocation(id, AllocationStatus::Released, now))
            .collect();

        if let Some(request) = state.requests.get_mut(request_id) {
            request.status = RequestStatus::Completed;
        }
        info!(
            request_id = %request_id,
            released = released.len(),
            "Released request allocations"
        );
        Ok(released)
    }

    /// Force-release every active allocation whose end time has passed
    pub fn expire_allocations(&self, now: DateTime<Utc>) -> Vec<Allocation> {
        let mut state = self.write();
        let ids: Vec<String> = state
            .allocations
            .values()
            .filter(|a| a.is_expired_at(now))
            .map(|a| a.id.clone())
            .collect();

        let expired: Vec<Allocation> = ids
            .iter()
            .filter_map(|id| state.finish_allocation(id, AllocationStatus::Expired, now))
            .collect();

        let touched: BTreeSet<String> = expired.iter().map(|a| a.request_id.clone()).collect();
        for request_id in touched {
            if state.active_allocations_for(&request_id).next().is_some() {
                continue;
            }
            if let Some(request) = state.requests.get_mut(&request_id) {
                if request.status == RequestStatus::Allocated {
                    request.status = RequestStatus::Completed;
                }
            }
        }

        for allocation in &expired {
            debug!(
                allocation_id = %allocation.id,
                request_id = %allocation.request_id,
                resource_id = %allocation.resource_id,
                "Allocation expired"
            );
        }
        expired
    }

    /// Fail pending requests whose deadline has passed
    pub fn fail_overdue_requests(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut state = self.write();
        let mut failed = Vec::new();
        for request in state.requests.values_mut() {
            let overdue = request.deadline.map_or(false, |d| d < now);
            if request.status == RequestStatus::Pending && overdue {
                request.status = RequestStatus::Failed;
                request.reason = Some("deadline exceeded while pending".to_string());
                warn!(request_id = %request.id, "Pending request missed its deadline");
                failed.push(request.id.clone());
            }
        }
        failed.sort();
        failed
    }

    /// Ids of the next pending requests in queue order
    pub fn pending_batch(&self, limit: usize) -> Vec<String> {
        next_batch(self.read().requests.values(), limit)
    }

    pub fn get_request(&self, request_id: &str) -> Option<ResourceRequest> {
        self.read().requests.get(request_id).cloned()
    }

    pub fn pending_requests(&self) -> Vec<ResourceRequest> {
        let state = self.read();
        let ids = next_batch(state.requests.values(), usize::MAX);
        ids.iter()
            .filter_map(|id| state.requests.get(id).cloned())
            .collect()
    }

    pub fn allocations_for_request(&self, request_id: &str) -> Vec<Allocation> {
        self.read()
            .allocations
            .values()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn list_allocations(&self) -> Vec<Allocation> {
        self.read().allocations.values().cloned().collect()
    }

    pub fn resource_count(&self) -> usize {
        self.read().resources.len()
    }

    pub fn pool_count(&self) -> usize {
        self.read().pools.len()
    }

    pub fn active_allocation_count(&self) -> usize {
        self.read().allocations.values().filter(|a| a.is_active()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.read()
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .count()
    }

    pub fn clear(&self) {
        *self.write() = RegistryState::default();
    }
}

/// Undo the grants made so far for a request
fn roll_back(state: &mut RegistryState, request_id: &str, granted: &[Allocation], now: DateTime<Utc>) {
    for allocation in granted {
        if let Some(resource) = state.resources.get_mut(&allocation.resource_id) {
            resource.restore(allocation.amount, now);
        }
        state.allocations.remove(&allocation.id);
        debug!(
            request_id = %request_id,
            allocation_id = %allocation.id,
            "Rolled back partial allocation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Priority, Requirement};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn registry() -> ResourceRegistry {
        let registry = ResourceRegistry::new();
        registry
            .add_resource(Resource::new("cpu-1", "cpu", 4.0, "cores"))
            .unwrap();
        registry
            .add_resource(Resource::new("mem-1", "memory", 16.0, "GB").with_allocated(14.0))
            .unwrap();
        registry
    }

    fn assert_consistent(registry: &ResourceRegistry) {
        for r in registry.list_resources() {
            assert!(r.is_consistent(), "inconsistent resource {:?}", r);
        }
    }

    #[test]
    fn test_add_duplicate_and_remove() {
        let registry = registry();
        assert_eq!(
            registry.add_resource(Resource::new("cpu-1", "cpu", 1.0, "cores")),
            Err(ControllerError::DuplicateResource("cpu-1".to_string()))
        );
        assert!(registry.remove_resource("cpu-1").is_ok());
        assert_eq!(
            registry.remove_resource("cpu-1"),
            Err(ControllerError::ResourceNotFound("cpu-1".to_string()))
        );
    }

    #[test]
    fn test_allocation_rolls_back_on_partial_failure() {
        let registry = registry();
        let request = ResourceRequest::new(
            "job-1",
            "batch",
            vec![
                Requirement::new("cpu", 4.0, "cores"),
                Requirement::new("memory", 8.0, "GB"),
            ],
            Priority::Normal,
        );
        registry.submit_request(request).unwrap();

        let outcome = registry.try_allocate("job-1", now()).unwrap();
        assert!(matches!(
            outcome,
            MatchOutcome::Unsatisfied { ref resource_type, .. } if resource_type == "memory"
        ));

        assert!(registry.list_allocations().is_empty());
        assert_eq!(registry.get_resource("cpu-1").unwrap().available, 4.0);
        assert_eq!(registry.get_resource("mem-1").unwrap().available, 2.0);
        assert_eq!(
            registry.get_request("job-1").unwrap().status,
            RequestStatus::Pending
        );
        assert_consistent(&registry);
    }

    #[test]
    fn test_allocate_and_release() {
        let registry = registry();
        registry
            .submit_request(ResourceRequest::new(
                "job-2",
                "web",
                vec![
                    Requirement::new("cpu", 3.0, "cores"),
                    Requirement::new("memory", 2.0, "GB"),
                ],
                Priority::High,
            ))
            .unwrap();

        let MatchOutcome::Allocated(allocations) = registry.try_allocate("job-2", now()).unwrap()
        else {
            panic!("expected allocation");
        };
        assert_eq!(allocations.len(), 2);
        assert_eq!(registry.get_resource("cpu-1").unwrap().allocated, 3.0);
        assert_eq!(registry.get_resource("mem-1").unwrap().available, 0.0);
        assert_consistent(&registry);

        assert_eq!(
            registry.remove_resource("cpu-1"),
            Err(ControllerError::ResourceInUse("cpu-1".to_string()))
        );

        let released = registry.release_request("job-2", now()).unwrap();
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|a| a.status == AllocationStatus::Released));
        assert_eq!(registry.get_resource("cpu-1").unwrap().available, 4.0);
        assert_eq!(registry.get_resource("mem-1").unwrap().available, 2.0);
        assert_eq!(
            registry.get_request("job-2").unwrap().status,
            RequestStatus::Completed
        );
        assert_consistent(&registry);
    }

    #[test]
    fn test_two_requirements_share_one_resource() {
        let registry = registry();
        registry
            .submit_request(ResourceRequest::new(
                "job-3",
                "web",
                vec![
                    Requirement::new("cpu", 2.0, "cores"),
                    Requirement::new("cpu", 3.0, "cores"),
                ],
                Priority::Normal,
            ))
            .unwrap();

        // second requirement sees the first grant, so the request must fail as a whole
        let outcome = registry.try_allocate("job-3", now()).unwrap();
        assert!(matches!(outcome, MatchOutcome::Unsatisfied { .. }));
        assert_eq!(registry.get_resource("cpu-1").unwrap().available, 4.0);
    }

    #[test]
    fn test_expiry_sweep() {
        let registry = registry();
        registry
            .submit_request(ResourceRequest::new(
                "job-4",
                "cron",
                vec![Requirement::new("cpu", 1.0, "cores").with_duration(60)],
                Priority::Normal,
            ))
            .unwrap();
        registry.try_allocate("job-4", now()).unwrap();

        assert!(registry.expire_allocations(now() + Duration::seconds(30)).is_empty());

        let expired = registry.expire_allocations(now() + Duration::seconds(61));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, AllocationStatus::Expired);
        assert_eq!(registry.get_resource("cpu-1").unwrap().available, 4.0);
        assert_eq!(
            registry.get_request("job-4").unwrap().status,
            RequestStatus::Completed
        );
        assert_eq!(registry.active_allocation_count(), 0);
    }

    #[test]
    fn test_update_capacity_respects_allocations() {
        let registry = registry();
        assert!(matches!(
            registry.update_capacity("mem-1", 10.0, now()),
            Err(ControllerError::CapacityBelowAllocated { .. })
        ));
        let updated = registry.update_capacity("mem-1", 32.0, now()).unwrap();
        assert_eq!(updated.available, 18.0);
        assert_consistent(&registry);
    }

    #[test]
    fn test_pools() {
        let registry = registry();
        assert_eq!(
            registry.create_resource_pool("p", "pool", vec!["nope".to_string()], now()),
            Err(ControllerError::ResourceNotFound("nope".to_string()))
        );

        registry
            .create_resource_pool(
                "p",
                "compute",
                vec!["cpu-1".to_string(), "mem-1".to_string(), "cpu-1".to_string()],
                now(),
            )
            .unwrap();
        let summary = registry.pool_summary("p").unwrap();
        assert_eq!(summary.resources, 2);
        assert_eq!(summary.capacity_total, 20.0);
        assert_eq!(summary.allocated, 14.0);
        assert!((summary.utilization - 0.7).abs() < 1e-9);

        registry.remove_resource("cpu-1").unwrap();
        assert_eq!(registry.pool_summary("p").unwrap().resources, 1);
        assert!(registry.remove_resource_pool("p").is_ok());
        assert!(matches!(
            registry.pool_summary("p"),
            Err(ControllerError::PoolNotFound(_))
        ));
    }

    #[test]
    fn test_overdue_pending_requests_fail() {
        let registry = registry();
        registry
            .submit_request(
                ResourceRequest::new(
                    "late",
                    "batch",
                    vec![Requirement::new("gpu", 1.0, "cards")],
                    Priority::Low,
                )
                .with_deadline(now()),
            )
            .unwrap();

        assert_eq!(registry.fail_overdue_requests(now() + Duration::seconds(1)), vec!["late"]);
        assert_eq!(
            registry.get_request("late").unwrap().status,
            RequestStatus::Failed
        );
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_submit_validation() {
        let registry = registry();
        let empty = ResourceRequest::new("e", "x", vec![], Priority::Low);
        assert!(registry.submit_request(empty).is_err());

        let ok = ResourceRequest::new("r", "x", vec![Requirement::new("cpu", 1.0, "")], Priority::Low);
        registry.submit_request(ok.clone()).unwrap();
        assert!(registry.submit_request(ok).is_err());
    }

    #[test]
    fn test_oversized_duration_is_rejected_untouched() {
        let registry = registry();
        let greedy = ResourceRequest::new(
            "forever",
            "batch",
            vec![Requirement::new("cpu", 2.0, "cores").with_duration(10_000_000_000_000)],
            Priority::High,
        );
        assert!(matches!(
            registry.submit_request(greedy),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(registry.get_request("forever").is_none());

        let cpu = registry.get_resource("cpu-1").unwrap();
        assert_eq!(cpu.allocated, 0.0);
        assert_eq!(cpu.available, 4.0);
        assert_consistent(&registry);

        let next = ResourceRequest::new(
            "next",
            "batch",
            vec![Requirement::new("cpu", 4.0, "cores").with_duration(3600)],
            Priority::Normal,
        );
        registry.submit_request(next).unwrap();
        assert!(matches!(
            registry.try_allocate("next", now()).unwrap(),
            MatchOutcome::Allocated(_)
        ));
        assert_eq!(registry.get_resource("cpu-1").unwrap().available, 0.0);
        assert_consistent(&registry);
    }

    #[test]
    fn test_end_time_past_calendar_rolls_back() {
        let registry = registry();
        let edge = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        registry
            .submit_request(ResourceRequest::new(
                "edge",
                "batch",
                vec![
                    Requirement::new("cpu", 2.0, "cores"),
                    Requirement::new("memory", 1.0, "GB").with_duration(60),
                ],
                Priority::Normal,
            ))
            .unwrap();

        let outcome = registry.try_allocate("edge", edge).unwrap();
        assert_eq!(outcome, MatchOutcome::NotPending(RequestStatus::Failed));
        assert!(registry.list_allocations().is_empty());
        assert_eq!(registry.get_resource("cpu-1").unwrap().available, 4.0);
        assert_eq!(registry.get_resource("mem-1").unwrap().available, 2.0);

        let request = registry.get_request("edge").unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert!(request.reason.unwrap().contains("out of range"));
        assert_consistent(&registry);
    }
}
