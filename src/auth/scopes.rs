//! Management API scopes requested at login

/// Scopes every login asks for.
///
/// `openid` and `offline_access` only make sense for interactive logins,
/// the latter being what makes the server hand out a refresh token.
#[rustfmt::skip]
pub const REQUIRED_SCOPES: &[&str] = &[
    "openid",
    "offline_access",
    "create:clients", "delete:clients", "read:clients", "update:clients",
    "read:client_grants",
    "create:resource_servers", "delete:resource_servers", "read:resource_servers", "update:resource_servers",
    "create:roles", "delete:roles", "read:roles", "update:roles",
    "create:rules", "delete:rules", "read:rules", "update:rules",
    "create:users", "delete:users", "read:users", "update:users",
    "read:branding", "update:branding",
    "create:phone_providers", "read:phone_providers", "update:phone_providers", "delete:phone_providers",
    "create:email_templates", "read:email_templates", "update:email_templates",
    "create:email_provider", "read:email_provider", "update:email_provider", "delete:email_provider",
    "read:flows", "read:forms", "read:flows_vault_connections",
    "read:connections", "update:connections", "read:connections_options", "update:connections_options",
    "read:client_keys", "read:logs", "read:tenant_settings", "update:tenant_settings",
    "read:custom_domains", "create:custom_domains", "update:custom_domains", "delete:custom_domains",
    "read:anomaly_blocks", "delete:anomaly_blocks",
    "create:log_streams", "delete:log_streams", "read:log_streams", "update:log_streams",
    "create:actions", "delete:actions", "read:actions", "update:actions",
    "create:organizations", "delete:organizations", "read:organizations", "update:organizations",
    "read:organization_members", "read:organization_member_roles", "read:organization_connections",
    "read:prompts", "update:prompts",
    "read:attack_protection", "update:attack_protection",
    "read:event_streams", "create:event_streams", "update:event_streams", "delete:event_streams",
    "read:network_acls", "create:network_acls", "update:network_acls", "delete:network_acls",
    "read:token_exchange_profiles", "create:token_exchange_profiles",
    "update:token_exchange_profiles", "delete:token_exchange_profiles",
    "read:organization_invitations", "create:organization_invitations", "delete:organization_invitations",
];

const INTERACTIVE_ONLY_SCOPES: &[&str] = &["openid", "offline_access"];

/// The full required scope list as owned strings.
#[must_use]
pub fn required_scopes() -> Vec<String> {
    REQUIRED_SCOPES.iter().map(|s| (*s).to_string()).collect()
}

/// Required scopes minus the ones that only apply to device-flow logins.
#[must_use]
pub fn required_scopes_for_client_credentials() -> Vec<String> {
    REQUIRED_SCOPES
        .iter()
        .copied()
        .filter(|scope| !INTERACTIVE_ONLY_SCOPES.contains(scope))
        .map(str::to_string)
        .collect()
}

/// Required scopes followed by any extra ones, without duplicates.
#[must_use]
pub fn with_additional_scopes(additional: &[String]) -> Vec<String> {
    let mut scopes = required_scopes();
    for scope in additional {
        if !scopes.contains(scope) {
            scopes.push(scope.clone());
        }
    }
    scopes
}
