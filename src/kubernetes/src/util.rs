use std::{collections::BTreeMap, str::FromStr};

use ipnet::IpNet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{Resource, ResourceExt};

use super::error::Error;

pub fn get_namespaced_name<T: Resource<DynamicType = ()>>(resource: &T) -> String {
    match resource.namespace() {
        Some(ns) => format!("{ns}/{}", resource.name_any()),
        None => resource.name_any(),
    }
}

/// Evaluates a LabelSelector against a label set.
///
/// All of `matchLabels` and `matchExpressions` must hold. An empty selector
/// matches everything.
pub fn match_selector(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, Error> {
    if let Some(match_labels) = selector.match_labels.as_ref() {
        for (k, v) in match_labels.iter() {
            if labels.get(k) != Some(v) {
                return Ok(false);
            }
        }
    }
    if let Some(exprs) = selector.match_expressions.as_ref() {
        for expr in exprs.iter() {
            let values = expr.values.as_deref().unwrap_or_default();
            let value = labels.get(&expr.key);
            let matched = match expr.operator.as_str() {
                "In" => value.map(|v| values.contains(v)).unwrap_or(false),
                "NotIn" => value.map(|v| !values.contains(v)).unwrap_or(true),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                op => return Err(Error::InvalidSelectorOperator(op.to_string())),
            };
            if !matched {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

pub fn parse_cidrs(cidrs: &[String]) -> Result<Vec<IpNet>, Error> {
    cidrs
        .iter()
        .map(|c| IpNet::from_str(c.trim()).map_err(|_| Error::InvalidCidr(c.to_string())))
        .collect()
}

/// Canonical form of a CIDR list: host bits cleared, sorted, deduplicated.
pub fn normalize_cidrs(cidrs: &[String]) -> Result<Vec<String>, Error> {
    let mut nets = parse_cidrs(cidrs)?
        .into_iter()
        .map(|n| n.trunc())
        .collect::<Vec<IpNet>>();
    nets.sort();
    nets.dedup();
    Ok(nets.iter().map(|n| n.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use rstest::rstest;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expr(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    #[rstest(
        selector,
        node_labels,
        expected,
        case(LabelSelector::default(), labels(&[]), true),
        case(LabelSelector::default(), labels(&[("egress", "true")]), true),
        case(
            LabelSelector { match_labels: Some(labels(&[("egress", "true")])), match_expressions: None },
            labels(&[("egress", "true"), ("zone", "a")]),
            true
        ),
        case(
            LabelSelector { match_labels: Some(labels(&[("egress", "true")])), match_expressions: None },
            labels(&[("egress", "false")]),
            false
        ),
        case(
            LabelSelector { match_labels: None, match_expressions: Some(vec![expr("zone", "In", &["a", "b"])]) },
            labels(&[("zone", "b")]),
            true
        ),
        case(
            LabelSelector { match_labels: None, match_expressions: Some(vec![expr("zone", "In", &["a", "b"])]) },
            labels(&[]),
            false
        ),
        case(
            LabelSelector { match_labels: None, match_expressions: Some(vec![expr("zone", "NotIn", &["a"])]) },
            labels(&[]),
            true
        ),
        case(
            LabelSelector { match_labels: None, match_expressions: Some(vec![expr("zone", "NotIn", &["a"])]) },
            labels(&[("zone", "a")]),
            false
        ),
        case(
            LabelSelector { match_labels: None, match_expressions: Some(vec![expr("egress", "Exists", &[])]) },
            labels(&[("egress", "")]),
            true
        ),
        case(
            LabelSelector {
                match_labels: Some(labels(&[("egress", "true")])),
                match_expressions: Some(vec![expr("maintenance", "DoesNotExist", &[])]),
            },
            labels(&[("egress", "true"), ("maintenance", "yes")]),
            false
        ),
    )]
    fn works_match_selector(
        selector: LabelSelector,
        node_labels: BTreeMap<String, String>,
        expected: bool,
    ) {
        assert_eq!(match_selector(&selector, &node_labels).unwrap(), expected);
    }

    #[test]
    fn fails_match_selector_unknown_operator() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expr("zone", "Gt", &["1"])]),
        };
        assert!(match_selector(&selector, &labels(&[("zone", "2")])).is_err());
    }

    #[rstest(
        input,
        expected,
        case(vec!["10.6.0.0/16"], vec!["10.6.0.0/16"]),
        case(vec!["10.6.1.5/16", "10.6.0.0/16", "fd00::/64"], vec!["10.6.0.0/16", "fd00::/64"]),
        case(vec![], vec![]),
    )]
    fn works_normalize_cidrs(input: Vec<&str>, expected: Vec<&str>) {
        let input = input.iter().map(|s| s.to_string()).collect::<Vec<String>>();
        assert_eq!(normalize_cidrs(&input).unwrap(), expected);
    }

    #[test]
    fn fails_parse_cidrs() {
        let input = vec!["10.6.0.0/16".to_string(), "10.6.0.0/40".to_string()];
        match parse_cidrs(&input) {
            Err(Error::InvalidCidr(c)) => assert_eq!(c, "10.6.0.0/40"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
