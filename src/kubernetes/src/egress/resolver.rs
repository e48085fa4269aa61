use crate::crd::egress_gateway::EgressGateway;

use kube::ResourceExt;

use super::error::Error;

/// Inputs of gateway resolution for one policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolution<'a> {
    /// `spec.egressGatewayName` when set.
    pub explicit: Option<&'a str>,
    /// Value of the namespace default label. Always `None` for cluster policies.
    pub namespace_default: Option<&'a str>,
    /// Gateway recorded as the cluster default claim in EgressClusterInfo.
    pub claim: Option<&'a str>,
}

/// Picks the gateway a policy egresses through.
///
/// An explicit name wins and must exist. Then the namespace default, then the
/// cluster default: the claimed gateway while it stays flagged, else the first
/// flagged gateway by name.
pub fn resolve(input: &Resolution<'_>, gateways: &[EgressGateway]) -> Result<String, Error> {
    let find = |name: &str| gateways.iter().find(|gw| gw.name_any() == name);

    if let Some(name) = input.explicit {
        return find(name)
            .map(|gw| gw.name_any())
            .ok_or_else(|| Error::GatewayNotFound(name.to_string()));
    }

    if let Some(gw) = input.namespace_default.filter(|s| !s.is_empty()).and_then(find) {
        return Ok(gw.name_any());
    }

    if let Some(gw) = input.claim.and_then(find) {
        if gw.spec.cluster_default {
            return Ok(gw.name_any());
        }
    }

    gateways
        .iter()
        .filter(|gw| gw.spec.cluster_default)
        .map(|gw| gw.name_any())
        .min()
        .ok_or(Error::Unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::egress_gateway::EgressGatewaySpec;
    use kube::core::ObjectMeta;
    use rstest::rstest;

    fn gateway(name: &str, cluster_default: bool) -> EgressGateway {
        EgressGateway {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: EgressGatewaySpec {
                cluster_default,
                ..Default::default()
            },
            status: None,
        }
    }

    fn gateways() -> Vec<EgressGateway> {
        vec![
            gateway("egw-b", true),
            gateway("egw-a", false),
            gateway("egw-ns", false),
        ]
    }

    #[rstest(
        explicit,
        namespace_default,
        claim,
        expected,
        case(Some("egw-a"), Some("egw-ns"), None, Ok("egw-a")),
        case(Some("missing"), None, None, Err(Error::GatewayNotFound("missing".to_string()))),
        case(None, Some("egw-ns"), None, Ok("egw-ns")),
        case(None, Some("missing"), None, Ok("egw-b")),
        case(None, Some(""), None, Ok("egw-b")),
        case(None, None, Some("egw-b"), Ok("egw-b")),
        case(None, None, Some("egw-a"), Ok("egw-b")),
        case(None, None, Some("deleted"), Ok("egw-b")),
    )]
    fn works_resolve(
        explicit: Option<&str>,
        namespace_default: Option<&str>,
        claim: Option<&str>,
        expected: Result<&str, Error>,
    ) {
        let input = Resolution {
            explicit,
            namespace_default,
            claim,
        };
        assert_eq!(
            resolve(&input, &gateways()),
            expected.map(|s| s.to_string())
        );
    }

    #[test]
    fn fails_resolve_without_default() {
        let gws = vec![gateway("egw-a", false)];
        assert_eq!(
            resolve(&Resolution::default(), &gws),
            Err(Error::Unresolved)
        );
    }

    #[test]
    fn works_resolve_multiple_flagged_by_name() {
        let gws = vec![gateway("egw-z", true), gateway("egw-c", true)];
        assert_eq!(resolve(&Resolution::default(), &gws).unwrap(), "egw-c");
        let claimed = Resolution {
            claim: Some("egw-z"),
            ..Default::default()
        };
        assert_eq!(resolve(&claimed, &gws).unwrap(), "egw-z");
    }
}
