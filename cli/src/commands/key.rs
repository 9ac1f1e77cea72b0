use super::{parse_json_arg, print_matrix, success, Context};
use acl::{Key, Results};
use anyhow::Result;
use clap::Subcommand;
use colored::*;
use serde_json::{json, Map, Value as JsonValue};

#[derive(Subcommand)]
pub enum KeyAction {
    /// Create a key. The full token is only shown here.
    Create {
        /// Client the key impersonates; omit for a top-level key
        #[arg(long)]
        client: Option<String>,

        /// Client recorded as the key's creator
        #[arg(long)]
        created_by: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Grants of a top-level key as a JSON access matrix
        #[arg(long)]
        resources: Option<String>,
    },

    /// List keys
    List {
        /// Only keys created by this client
        #[arg(long)]
        created_by: Option<String>,

        /// Print full tokens instead of their tails
        #[arg(long)]
        full_token: bool,
    },

    /// Show one key
    Show {
        id: String,

        #[arg(long)]
        full_token: bool,
    },

    /// Change the description of a key
    Describe { id: String, description: String },

    /// Delete a key
    Delete { id: String },

    /// Grant access to a resource
    Grant {
        id: String,
        resource: String,
        access: String,
    },

    /// Remove a resource grant
    Revoke { id: String, resource: String },
}

pub async fn execute(action: KeyAction, ctx: &Context) -> Result<()> {
    let keys = &ctx.acl.keys;
    let display_length = keys.token_display_length();

    match action {
        KeyAction::Create {
            client,
            created_by,
            description,
            resources,
        } => {
            let mut input = Map::new();
            if let Some(client) = client {
                input.insert("client".to_string(), json!(client));
            }
            if let Some(description) = description {
                input.insert("description".to_string(), json!(description));
            }
            if let Some(raw) = resources {
                input.insert("resources".to_string(), parse_json_arg("resources", &raw)?);
            }

            let created = keys
                .create(&JsonValue::Object(input), created_by.as_deref())
                .await?;
            if !emit_keys(ctx, &created, display_length, true)? {
                for key in &created.results {
                    success(format!("Created key {}", key.id));
                    println!("  token: {}", key.token.yellow().bold());
                    println!("  {}", "Store this token now, it will not be shown again".dimmed());
                }
            }
        }
        KeyAction::List {
            created_by,
            full_token,
        } => {
            let found = match created_by {
                Some(client) => keys.created_by(&client).await?,
                None => keys.get(None).await?,
            };
            if !emit_keys(ctx, &found, display_length, full_token)? {
                if found.results.is_empty() {
                    println!("{}", "No keys".dimmed());
                }
                for key in &found.results {
                    print_key(key, display_length, full_token);
                }
            }
        }
        KeyAction::Show { id, full_token } => {
            let key = keys.get_one(&id).await?;
            if !emit_keys(ctx, &Results::one(key.clone()), display_length, full_token)? {
                print_key(&key, display_length, full_token);
            }
        }
        KeyAction::Describe { id, description } => {
            let updated = keys
                .update(&id, &json!({ "description": description }))
                .await?;
            if !emit_keys(ctx, &updated, display_length, false)? {
                success(format!("Updated key {}", id));
            }
        }
        KeyAction::Delete { id } => {
            let deleted = keys.delete(&id).await?;
            if !ctx.emit_json(&deleted)? {
                success(format!("Deleted key {}", id));
            }
        }
        KeyAction::Grant {
            id,
            resource,
            access,
        } => {
            let access = parse_json_arg("access", &access)?;
            let updated = keys.resource_add(&id, &resource, &access).await?;
            if !emit_keys(ctx, &updated, display_length, false)? {
                success(format!("Granted '{}' to key {}", resource, id));
            }
        }
        KeyAction::Revoke { id, resource } => {
            let updated = keys.resource_remove(&id, &resource).await?;
            if !emit_keys(ctx, &updated, display_length, false)? {
                success(format!("Revoked '{}' from key {}", resource, id));
            }
        }
    }

    Ok(())
}

fn emit_keys(
    ctx: &Context,
    keys: &Results<Key>,
    display_length: usize,
    full_token: bool,
) -> Result<bool> {
    let results: Vec<JsonValue> = keys
        .results
        .iter()
        .map(|key| key.to_json(display_length, full_token))
        .collect();
    ctx.emit_json(&json!({ "results": results }))
}

fn print_key(key: &Key, display_length: usize, full_token: bool) {
    let token = if full_token {
        key.token.clone()
    } else {
        acl::secret::display_token(&key.token, display_length)
    };
    println!("{} {}", key.id.cyan().bold(), token.dimmed());

    match &key.client {
        Some(client) => println!("  impersonates: {}", client),
        None => println!("  top-level"),
    }
    if let Some(creator) = &key.created_by {
        println!("  created by: {}", creator);
    }
    if let Some(description) = &key.description {
        println!("  description: {}", description);
    }
    if key.is_top_level() {
        println!("  resources:");
        print_matrix(key.resources.iter());
    }
}
