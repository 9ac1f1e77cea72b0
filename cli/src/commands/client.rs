use super::{parse_json_arg, print_matrix, success, Context};
use acl::{Client, CreateOptions};
use anyhow::Result;
use clap::Subcommand;
use colored::*;
use serde_json::{json, Map, Value as JsonValue};

#[derive(Subcommand)]
pub enum ClientAction {
    /// Create a client
    Create {
        client_id: String,

        /// Client secret
        #[arg(long, env = "ACL_CLIENT_SECRET", hide_env_values = true)]
        secret: String,

        /// Create an admin client, which bypasses access checks
        #[arg(long)]
        admin: bool,

        /// Role to assign (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Direct grants as a JSON access matrix
        #[arg(long)]
        resources: Option<String>,
    },

    /// List all clients
    List,

    /// Show one client
    Show { client_id: String },

    /// Delete a client
    Delete { client_id: String },

    /// Grant access to a resource, e.g. '{"read": true}'
    Grant {
        client_id: String,
        resource: String,
        access: String,
    },

    /// Merge access into an existing resource grant
    Amend {
        client_id: String,
        resource: String,
        access: String,
    },

    /// Remove a resource grant
    Revoke { client_id: String, resource: String },

    /// Add roles to a client
    AddRole {
        client_id: String,
        #[arg(required = true)]
        roles: Vec<String>,
    },

    /// Remove roles from a client
    RemoveRole {
        client_id: String,
        #[arg(required = true)]
        roles: Vec<String>,
    },
}

pub async fn execute(action: ClientAction, ctx: &Context) -> Result<()> {
    let clients = &ctx.acl.clients;

    match action {
        ClientAction::Create {
            client_id,
            secret,
            admin,
            roles,
            resources,
        } => {
            let mut input = Map::new();
            input.insert("clientId".to_string(), json!(client_id));
            input.insert("secret".to_string(), json!(secret));
            if admin {
                input.insert("accessType".to_string(), json!("admin"));
            }
            if !roles.is_empty() {
                input.insert("roles".to_string(), json!(roles));
            }
            if let Some(raw) = resources {
                input.insert("resources".to_string(), parse_json_arg("resources", &raw)?);
            }

            let created = clients
                .create(
                    &JsonValue::Object(input),
                    CreateOptions {
                        allow_access_type: true,
                    },
                )
                .await?;
            if !ctx.emit_json(&created)? {
                success(format!("Created client '{}'", client_id));
            }
        }
        ClientAction::List => {
            let all = clients.get(None).await?;
            if !ctx.emit_json(&all)? {
                if all.results.is_empty() {
                    println!("{}", "No clients".dimmed());
                }
                for client in &all.results {
                    print_client(client);
                }
            }
        }
        ClientAction::Show { client_id } => {
            let client = clients.get_one(&client_id).await?;
            if !ctx.emit_json(&client)? {
                print_client(&client);
            }
        }
        ClientAction::Delete { client_id } => {
            let deleted = clients.delete(&client_id).await?;
            if !ctx.emit_json(&deleted)? {
                success(format!("Deleted client '{}'", client_id));
            }
        }
        ClientAction::Grant {
            client_id,
            resource,
            access,
        } => {
            let access = parse_json_arg("access", &access)?;
            let updated = clients.resource_add(&client_id, &resource, &access).await?;
            if !ctx.emit_json(&updated)? {
                success(format!("Granted '{}' to client '{}'", resource, client_id));
            }
        }
        ClientAction::Amend {
            client_id,
            resource,
            access,
        } => {
            let access = parse_json_arg("access", &access)?;
            let updated = clients
                .resource_update(&client_id, &resource, &access)
                .await?;
            if !ctx.emit_json(&updated)? {
                success(format!("Updated '{}' for client '{}'", resource, client_id));
            }
        }
        ClientAction::Revoke {
            client_id,
            resource,
        } => {
            let updated = clients.resource_remove(&client_id, &resource).await?;
            if !ctx.emit_json(&updated)? {
                success(format!("Revoked '{}' from client '{}'", resource, client_id));
            }
        }
        ClientAction::AddRole { client_id, roles } => {
            let updated = clients.role_add(&client_id, &roles).await?;
            if !ctx.emit_json(&updated)? {
                let roles = updated
                    .results
                    .first()
                    .map(|client| client.roles.join(", "))
                    .unwrap_or_default();
                success(format!("Client '{}' now has roles: {}", client_id, roles));
            }
        }
        ClientAction::RemoveRole { client_id, roles } => {
            let updated = clients.role_remove(&client_id, &roles).await?;
            if !ctx.emit_json(&updated)? {
                if updated.removed.is_empty() {
                    println!("{}", "No roles removed".yellow());
                } else {
                    success(format!("Removed roles: {}", updated.removed.join(", ")));
                }
            }
        }
    }

    Ok(())
}

fn print_client(client: &Client) {
    let kind = if client.is_admin() {
        client.access_type.to_string().red().bold()
    } else {
        client.access_type.to_string().normal()
    };
    println!("{} ({})", client.client_id.cyan().bold(), kind);

    if !client.roles.is_empty() {
        println!("  roles: {}", client.roles.join(", "));
    }
    println!("  resources:");
    print_matrix(client.resources.iter());
}
