//! diagnostics produced while validating provider bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Issue {
    #[error(
        "Invalid provider configuration: provider {name:?} in {module} uses for_each without an \
         alias. for_each is only valid on aliased provider configurations, the default \
         configuration must always have exactly one instance"
    )]
    ForEachWithoutAlias { module: String, name: String },

    #[error(
        "Missing provider instance key: {subject} uses provider configuration {provider}, which \
         has for_each set. Select an instance, for example: {provider}[each.key]"
    )]
    MissingInstanceKey { subject: String, provider: String },

    #[error(
        "Unexpected provider instance key: {subject} selects an instance of provider \
         configuration {provider}, which does not have for_each set"
    )]
    UnexpectedInstanceKey { subject: String, provider: String },

    #[error(
        "Provider configuration for_each matches resource: {resource} and provider \
         configuration {provider} use the same for_each expression. Removing an element removes \
         the provider instance needed to destroy the resource instance in the same run, which \
         fails the next plan. The resource's collection should be a subset of the provider's, \
         so that provider instances outlive their resource instances by at least one apply"
    )]
    ForEachCollision { resource: String, provider: String },

    #[error(
        "Provider instance not present: {resource} was created by provider instance {provider}, \
         which no longer exists. Restore the removed instance key until the resource has been \
         destroyed"
    )]
    ProviderInstanceNotPresent { resource: String, provider: String },

    #[error(
        "Provider configuration not present: {resource} was created by provider configuration \
         {provider}, which is no longer declared. Restore the configuration until the resource \
         has been destroyed"
    )]
    ProviderConfigNotPresent { resource: String, provider: String },

    #[error(
        "Provider instances unknown: {resource} was created by an instance of provider \
         configuration {provider}, whose instances cannot be determined without planning \
         ({reason}). Make sure the instance still exists before applying"
    )]
    ProviderInstancesUnknown {
        resource: String,
        provider: String,
        reason: String,
    },
}

impl Issue {
    pub fn severity(&self) -> Severity {
        match self {
            Issue::ForEachCollision { .. } | Issue::ProviderInstancesUnknown { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

#[derive(derive_new::new, Debug, Default, Clone, PartialEq)]
pub struct Diagnostics {
    #[new(default)]
    issues: Vec<Issue>,
}

impl Diagnostics {
    pub fn log(&mut self, issue: Issue) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Warning)
    }
}

impl std::error::Error for Diagnostics {}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, issue) in self.issues.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            match issue.severity() {
                Severity::Error => write!(f, "Error: {issue}")?,
                Severity::Warning => write!(f, "Warning: {issue}")?,
            }
        }
        Ok(())
    }
}

/// Human readable module name for diagnostics
pub(crate) fn module_display(module: &crate::addrs::ModulePath) -> String {
    if module.is_root() {
        "the root module".to_string()
    } else {
        module.to_string()
    }
}
