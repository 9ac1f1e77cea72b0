use super::{describe_set, print_matrix, success, Context};
use acl::{
    AccessListing, AccessType, ClientIdentity, Decision, GetOptions, MatrixOptions,
    PermissionEvaluator,
};
use anyhow::{anyhow, Result};
use clap::Subcommand;
use colored::*;
use serde_json::json;

#[derive(Subcommand)]
pub enum AccessAction {
    /// Show the resolved access of a client
    Show {
        client_id: String,

        /// Only this resource
        #[arg(long)]
        resource: Option<String>,

        /// Keep readOwn/updateOwn/deleteOwn instead of turning them into filtered grants
        #[arg(long)]
        raw: bool,
    },

    /// Check whether a client may perform one access type on a resource
    Check {
        client_id: String,
        resource: String,
        /// e.g. read, update, deleteOwn
        access_type: String,
    },

    /// Rebuild the resolved access table
    Recompute,
}

/// Admin clients resolve as admins; anyone else, known or not, as a user
async fn identity(ctx: &Context, client_id: &str) -> Result<ClientIdentity> {
    let found = ctx.acl.clients.get(Some(client_id)).await?;
    Ok(match found.results.first() {
        Some(client) => ClientIdentity::from(client),
        None => ClientIdentity::user(client_id),
    })
}

pub async fn execute(action: AccessAction, ctx: &Context) -> Result<()> {
    let resolver = &ctx.acl.access;

    match action {
        AccessAction::Show {
            client_id,
            resource,
            raw,
        } => {
            let identity = identity(ctx, &client_id).await?;
            let options = if raw {
                GetOptions::raw()
            } else {
                GetOptions::default()
            };

            match resource {
                Some(resource) => {
                    let set = resolver.get(&identity, &resource, options).await?;
                    if ctx.json() {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&json!({
                                "client": client_id,
                                "resource": resource,
                                "access": set.to_json(&MatrixOptions::default()),
                            }))?
                        );
                    } else {
                        println!("{} on {}: {}", client_id.cyan().bold(), resource.bold(), describe_set(&set));
                    }
                }
                None => {
                    let listing = resolver.get_all(&identity, options).await?;
                    if ctx.json() {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&listing.to_json(&MatrixOptions::default()))?
                        );
                    } else {
                        println!("{}", client_id.cyan().bold());
                        match &listing {
                            AccessListing::Unrestricted(_) => {
                                println!("    {}", "admin: every access type on every resource".red())
                            }
                            AccessListing::PerResource(matrix) => print_matrix(matrix.iter()),
                        }
                    }
                }
            }
        }
        AccessAction::Check {
            client_id,
            resource,
            access_type,
        } => {
            let access_type: AccessType = access_type
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            let identity = identity(ctx, &client_id).await?;
            let set = resolver
                .get(&identity, &resource, GetOptions::default())
                .await?;
            let decision = PermissionEvaluator::evaluate(&set, access_type);

            if ctx.json() {
                let body = match &decision {
                    Decision::Denied => json!({ "allowed": false }),
                    Decision::Allowed { fields, filter } => json!({
                        "allowed": true,
                        "fields": fields.as_ref().map(|p| p.to_json()),
                        "filter": filter,
                    }),
                };
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                match &decision {
                    Decision::Denied => println!("{}", "denied".red().bold()),
                    Decision::Allowed { fields, filter } => {
                        println!("{}", "allowed".green().bold());
                        if let Some(fields) = fields {
                            println!("  fields: {}", fields.to_json());
                        }
                        if let Some(filter) = filter {
                            println!("  filter: {}", serde_json::Value::Object(filter.clone()));
                        }
                    }
                }
            }
        }
        AccessAction::Recompute => {
            resolver.recompute().await?;
            let entries = resolver.entries().await?;
            if ctx.json() {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                success(format!("Resolved access table rebuilt ({} rows)", entries.len()));
            }
        }
    }

    Ok(())
}
