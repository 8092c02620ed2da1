//! Load balancer for service discovery
//!
//! Provides weighted random selection from healthy instances.

use batata_sdk_api::naming::Instance;
use rand::Rng;
use tracing::debug;

/// Load balancer using random weighted selection
pub struct Balancer;

impl Balancer {
    /// Instances that can take traffic: healthy, enabled and with a
    /// positive weight.
    pub fn select_healthy(hosts: &[Instance]) -> Vec<Instance> {
        hosts
            .iter()
            .filter(|host| host.is_available() && host.weight > 0.0)
            .cloned()
            .collect()
    }

    /// Randomly select one healthy instance, weighted by `weight`.
    pub fn select_host(hosts: &[Instance]) -> Option<Instance> {
        let candidates = Self::select_healthy(hosts);
        if candidates.is_empty() {
            debug!("No healthy instance among {} hosts", hosts.len());
            return None;
        }

        let total_weight: f64 = candidates.iter().map(|h| h.weight).sum();
        let random = rand::rng().random_range(0.0..total_weight);

        let mut weight_sum = 0.0;
        for host in &candidates {
            weight_sum += host.weight;
            if random < weight_sum {
                return Some(host.clone());
            }
        }

        // Rounding can leave `random` just past the final sum
        candidates.last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(ip: &str, weight: f64, healthy: bool) -> Instance {
        Instance {
            healthy,
            ..Instance::new(ip, 8080).with_weight(weight)
        }
    }

    #[test]
    fn test_select_healthy() {
        let mut disabled = instance("10.0.0.4", 1.0, true);
        disabled.enabled = false;
        let hosts = vec![
            instance("10.0.0.1", 1.0, true),
            instance("10.0.0.2", 1.0, false),
            instance("10.0.0.3", 0.0, true),
            disabled,
            instance("10.0.0.5", 1.0, true),
        ];

        let healthy = Balancer::select_healthy(&hosts);
        assert_eq!(healthy.len(), 2);
        assert_eq!(healthy[0].ip, "10.0.0.1");
        assert_eq!(healthy[1].ip, "10.0.0.5");
    }

    #[test]
    fn test_select_host_none_available() {
        assert!(Balancer::select_host(&[]).is_none());
        assert!(Balancer::select_host(&[instance("10.0.0.1", 1.0, false)]).is_none());
    }

    #[test]
    fn test_random_weighted() {
        let hosts = vec![
            instance("1", 1.0, true),
            instance("2", 2.0, true),
            instance("3", 7.0, true),
        ];

        let mut counts = [0usize; 3];
        for _ in 0..2000 {
            match Balancer::select_host(&hosts).unwrap().ip.as_str() {
                "1" => counts[0] += 1,
                "2" => counts[1] += 1,
                "3" => counts[2] += 1,
                other => panic!("unexpected host {}", other),
            }
        }

        assert!(counts[2] > counts[1]);
        assert!(counts[2] > counts[0]);
    }
}
