//! ARN parsing. Everything that needs a region, account, or resource name
//! out of an ARN goes through [`Arn::parse`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, Result};

static ARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:(?P<partition>[^:]+):(?P<service>[^:]+):(?P<region>[^:]*):(?P<account>[^:]*):(?P<resource>.+)$")
        .expect("ARN pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    /// `stack`, `service`, `targetgroup`, `secret`, ... Empty when the
    /// resource part has no type prefix.
    pub resource_type: String,
    pub resource_id: String,
}

impl Arn {
    pub fn parse(s: &str) -> Result<Self> {
        let caps = ARN_RE
            .captures(s.trim())
            .ok_or_else(|| AppError::InvalidArn(s.to_string()))?;
        let resource = &caps["resource"];
        // Resource is `type/id`, `type:id`, or a bare id.
        let (resource_type, resource_id) = match resource.find(['/', ':']) {
            Some(i) => (&resource[..i], &resource[i + 1..]),
            None => ("", resource),
        };
        Ok(Self {
            partition: caps["partition"].to_string(),
            service: caps["service"].to_string(),
            region: caps["region"].to_string(),
            account: caps["account"].to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        })
    }

    /// First path segment of the resource id: the stack name of a
    /// CloudFormation stack ARN, the cluster of an ECS service ARN, the
    /// name of a target group ARN.
    pub fn name(&self) -> &str {
        self.resource_id.split('/').next().unwrap_or(&self.resource_id)
    }

    /// Last path segment: the service name of an ECS service ARN.
    pub fn leaf(&self) -> &str {
        self.resource_id.rsplit('/').next().unwrap_or(&self.resource_id)
    }
}

impl FromStr for Arn {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arn:{}:{}:{}:{}:", self.partition, self.service, self.region, self.account)?;
        if self.resource_type.is_empty() {
            write!(f, "{}", self.resource_id)
        } else {
            let sep = if self.service == "secretsmanager" { ':' } else { '/' };
            write!(f, "{}{}{}", self.resource_type, sep, self.resource_id)
        }
    }
}

/// Stack name from either a bare name or a stack ARN.
pub fn stack_name(name_or_arn: &str) -> String {
    match Arn::parse(name_or_arn) {
        Ok(arn) if arn.resource_type == "stack" => arn.name().to_string(),
        _ => name_or_arn.to_string(),
    }
}
