use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Device, DeviceAssignment};

/// An axis along which persisted events are indexed for retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceEventIndex {
    Device,
    Assignment,
    Area,
    Customer,
}

/// One `(axis, key)` tag attached to an event at write time. Keys are never
/// recomputed: if the assignment's hierarchy changes later, historical
/// events keep the keys they were written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub index: DeviceEventIndex,
    pub entity_id: Uuid,
}

/// Write-time indexing policy. Pure computation, no I/O.
///
/// Device and Assignment axes are mandatory and always produced; the
/// remaining axes are deployment-configurable and omitted for an event when
/// the resolved assignment lacks the source field.
#[derive(Debug, Clone)]
pub struct IndexPolicy {
    axes: Vec<DeviceEventIndex>,
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self::new(vec![
            DeviceEventIndex::Device,
            DeviceEventIndex::Assignment,
            DeviceEventIndex::Area,
            DeviceEventIndex::Customer,
        ])
    }
}

impl IndexPolicy {
    pub fn new(mut axes: Vec<DeviceEventIndex>) -> Self {
        // Mandatory axes are enforced even if the configuration omits them.
        for mandatory in [DeviceEventIndex::Device, DeviceEventIndex::Assignment] {
            if !axes.contains(&mandatory) {
                axes.push(mandatory);
            }
        }
        axes.dedup();
        Self { axes }
    }

    pub fn compute_keys(&self, device: &Device, assignment: &DeviceAssignment) -> Vec<IndexKey> {
        let mut keys = Vec::with_capacity(self.axes.len());
        for axis in &self.axes {
            let entity_id = match axis {
                DeviceEventIndex::Device => Some(device.id),
                DeviceEventIndex::Assignment => Some(assignment.id),
                DeviceEventIndex::Area => assignment.area_id,
                DeviceEventIndex::Customer => assignment.customer_id,
            };
            if let Some(entity_id) = entity_id {
                keys.push(IndexKey {
                    index: *axis,
                    entity_id,
                });
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AssignmentStatus;

    fn device() -> Device {
        Device {
            id: Uuid::new_v4(),
            token: "hw-0001".to_string(),
            area_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn assignment(device: &Device, area: Option<Uuid>, customer: Option<Uuid>) -> DeviceAssignment {
        DeviceAssignment {
            id: Uuid::new_v4(),
            token: "asn-0001".to_string(),
            device_id: device.id,
            device_token: device.token.clone(),
            area_id: area,
            customer_id: customer,
            status: AssignmentStatus::Active,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_mandatory_axes_always_present() {
        let policy = IndexPolicy::new(vec![DeviceEventIndex::Area]);
        let device = device();
        let assignment = assignment(&device, None, None);

        let keys = policy.compute_keys(&device, &assignment);

        assert!(keys.contains(&IndexKey {
            index: DeviceEventIndex::Device,
            entity_id: device.id
        }));
        assert!(keys.contains(&IndexKey {
            index: DeviceEventIndex::Assignment,
            entity_id: assignment.id
        }));
    }

    #[test]
    fn test_missing_source_field_omits_axis() {
        let policy = IndexPolicy::default();
        let device = device();
        let assignment = assignment(&device, None, None);

        let keys = policy.compute_keys(&device, &assignment);

        assert_eq!(keys.len(), 2);
        assert!(!keys.iter().any(|k| k.index == DeviceEventIndex::Area));
        assert!(!keys.iter().any(|k| k.index == DeviceEventIndex::Customer));
    }

    #[test]
    fn test_all_axes_when_hierarchy_complete() {
        let policy = IndexPolicy::default();
        let device = device();
        let area = Uuid::new_v4();
        let customer = Uuid::new_v4();
        let assignment = assignment(&device, Some(area), Some(customer));

        let keys = policy.compute_keys(&device, &assignment);

        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&IndexKey {
            index: DeviceEventIndex::Area,
            entity_id: area
        }));
        assert!(keys.contains(&IndexKey {
            index: DeviceEventIndex::Customer,
            entity_id: customer
        }));
    }
}
