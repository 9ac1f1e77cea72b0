use super::{parse_json_arg, print_matrix, success, Context};
use acl::Role;
use anyhow::Result;
use clap::Subcommand;
use colored::*;
use serde_json::{json, Map, Value as JsonValue};

#[derive(Subcommand)]
pub enum RoleAction {
    /// Create a role
    Create {
        name: String,

        /// Parent role to inherit grants from
        #[arg(long)]
        extends: Option<String>,

        /// Grants as a JSON access matrix
        #[arg(long)]
        resources: Option<String>,
    },

    /// List all roles
    List,

    /// Show one role
    Show { name: String },

    /// Set or clear the parent of a role
    Extend {
        name: String,

        /// New parent; omit to detach the role
        #[arg(long)]
        parent: Option<String>,
    },

    /// Delete a role; children are detached
    Delete { name: String },

    /// Grant access to a resource
    Grant {
        name: String,
        resource: String,
        access: String,
    },

    /// Merge access into an existing resource grant
    Amend {
        name: String,
        resource: String,
        access: String,
    },

    /// Remove a resource grant
    Revoke { name: String, resource: String },
}

pub async fn execute(action: RoleAction, ctx: &Context) -> Result<()> {
    let roles = &ctx.acl.roles;

    match action {
        RoleAction::Create {
            name,
            extends,
            resources,
        } => {
            let mut input = Map::new();
            input.insert("name".to_string(), json!(name));
            if let Some(parent) = extends {
                input.insert("extends".to_string(), json!(parent));
            }
            if let Some(raw) = resources {
                input.insert("resources".to_string(), parse_json_arg("resources", &raw)?);
            }

            let created = roles.create(&JsonValue::Object(input)).await?;
            if !ctx.emit_json(&created)? {
                success(format!("Created role '{}'", name));
            }
        }
        RoleAction::List => {
            let all = roles.get(None).await?;
            if !ctx.emit_json(&all)? {
                if all.results.is_empty() {
                    println!("{}", "No roles".dimmed());
                }
                for role in &all.results {
                    print_role(role);
                }
            }
        }
        RoleAction::Show { name } => {
            let role = roles.get_one(&name).await?;
            if !ctx.emit_json(&role)? {
                print_role(&role);
            }
        }
        RoleAction::Extend { name, parent } => {
            let updated = roles.update(&name, &json!({ "extends": parent })).await?;
            if !ctx.emit_json(&updated)? {
                match parent {
                    Some(parent) => success(format!("Role '{}' now extends '{}'", name, parent)),
                    None => success(format!("Role '{}' no longer extends another role", name)),
                }
            }
        }
        RoleAction::Delete { name } => {
            let deleted = roles.delete(&name).await?;
            if !ctx.emit_json(&deleted)? {
                success(format!("Deleted role '{}'", name));
            }
        }
        RoleAction::Grant {
            name,
            resource,
            access,
        } => {
            let access = parse_json_arg("access", &access)?;
            let updated = roles.resource_add(&name, &resource, &access).await?;
            if !ctx.emit_json(&updated)? {
                success(format!("Granted '{}' to role '{}'", resource, name));
            }
        }
        RoleAction::Amend {
            name,
            resource,
            access,
        } => {
            let access = parse_json_arg("access", &access)?;
            let updated = roles.resource_update(&name, &resource, &access).await?;
            if !ctx.emit_json(&updated)? {
                success(format!("Updated '{}' for role '{}'", resource, name));
            }
        }
        RoleAction::Revoke { name, resource } => {
            let updated = roles.resource_remove(&name, &resource).await?;
            if !ctx.emit_json(&updated)? {
                success(format!("Revoked '{}' from role '{}'", resource, name));
            }
        }
    }

    Ok(())
}

fn print_role(role: &Role) {
    match &role.extends {
        Some(parent) => println!("{} extends {}", role.name.cyan().bold(), parent),
        None => println!("{}", role.name.cyan().bold()),
    }
    println!("  resources:");
    print_matrix(role.resources.iter());
}
