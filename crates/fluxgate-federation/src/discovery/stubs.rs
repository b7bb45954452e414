//! Placeholder sources for infrastructure catalogs.
//!
//! Kubernetes, Consul, etcd, and DNS discovery are declared so their specs
//! validate and schedule, but they return empty sets until an integration
//! lands. Disabled or empty sources are harmless to the merge.

use async_trait::async_trait;
use tracing::debug;

use fluxgate_types::{DiscoverySourceType, GatewayResult, McpServer};

use super::DiscoverySource;

macro_rules! stub_source {
    ($name:ident, $kind:expr) => {
        /// Stub source; discovers nothing.
        #[derive(Debug)]
        pub struct $name {
            id: String,
        }

        impl $name {
            /// Create the stub with its source id.
            #[must_use]
            pub fn new(id: String) -> Self {
                Self { id }
            }
        }

        #[async_trait]
        impl DiscoverySource for $name {
            fn id(&self) -> &str {
                &self.id
            }

            fn source_type(&self) -> DiscoverySourceType {
                $kind
            }

            async fn discover(&self) -> GatewayResult<Vec<McpServer>> {
                debug!(source = %self.id, kind = $kind.as_str(), "stub source, nothing discovered");
                Ok(Vec::new())
            }
        }
    };
}

stub_source!(KubernetesSource, DiscoverySourceType::Kubernetes);
stub_source!(ConsulSource, DiscoverySourceType::Consul);
stub_source!(EtcdSource, DiscoverySourceType::Etcd);
stub_source!(DnsSource, DiscoverySourceType::Dns);
