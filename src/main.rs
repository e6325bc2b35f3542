use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use espalier::{
    Actor, DocumentInput, ResolvedPath, RevisionInput, Store, StoreError, CURRENT_SCHEMA,
};

#[derive(Parser, Debug)]
#[command(name = "espalier")]
#[command(author, version, about = "Revision-tracked hierarchical page store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Site whose page tree the command operates on
    #[arg(long, global = true, default_value = "default")]
    site: String,

    /// Act as this user id (anonymous when omitted)
    #[arg(long, global = true)]
    user: Option<i32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .espalier/ with a default config and an empty store
    Init,
    /// Create the site's root page (no-op if one exists)
    Root {
        /// Title for the root page
        #[arg(long, default_value = "Root")]
        title: String,
        /// Content for the root page
        #[arg(long, default_value = "")]
        content: String,
    },
    /// Create a page at a path; the parent path must already exist
    New {
        /// Path of the new page, e.g. guides/install
        path: String,
        /// Page title (derived from the slug when omitted)
        #[arg(long)]
        title: Option<String>,
        /// Page content
        #[arg(long, default_value = "")]
        content: String,
        /// Revision log message
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Append a revision to the page at a path
    Edit {
        path: String,
        /// New title (kept from the previous revision when omitted)
        #[arg(long)]
        title: Option<String>,
        /// New content (kept from the previous revision when omitted)
        #[arg(long)]
        content: Option<String>,
        /// Revision log message
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Print the current revision of the page at a path
    Show {
        path: String,
        /// Print stored content without the display sanitizer pass
        #[arg(long)]
        raw: bool,
    },
    /// Print the revision history of the page at a path
    Log { path: String },
    /// Print the site's page tree
    Tree,
    /// Delete the page at a path AND its whole subtree. Cannot be undone.
    Rm {
        path: String,
        /// Actually do it
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completion { shell: Shell },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> espalier::Result<()> {
    let actor = match cli.user {
        Some(user_id) => Actor::user(user_id),
        None => Actor::anonymous(),
    };

    match cli.command {
        Command::Init => init(),
        Command::Root { title, content } => {
            let store = Store::open()?;
            let site = store.ensure_site(&cli.site)?;
            let input = RevisionInput::new(&title, &content)
                .attribute_actor(&actor, store.settings());
            let root = store.ensure_root(site.id, input)?;
            println!(
                "{} root page for site '{}' (node {})",
                "ok:".green().bold(),
                cli.site,
                root.id
            );
            Ok(())
        }
        Command::New {
            path,
            title,
            content,
            message,
        } => {
            let store = Store::open()?;
            let site = store.find_site(&cli.site)?;
            let trimmed = espalier::normalize(&path).to_string();
            if trimmed.is_empty() {
                return Err(StoreError::Validation(
                    "empty path; use 'espalier root' to create the root page".to_string(),
                ));
            }
            let (parent_path, slug) = match trimmed.rsplit_once('/') {
                Some((parent, slug)) => (parent.to_string(), slug.to_string()),
                None => (String::new(), trimmed),
            };
            let parent = store.resolve(site.id, &parent_path)?;
            check_write(&store, &parent, &actor)?;

            let title = title.unwrap_or_else(|| title_from_slug(&slug));
            let document = DocumentInput {
                owner_id: cli.user,
                ..DocumentInput::default()
            };
            let revision = RevisionInput::new(&title, &content)
                .with_message(&message)
                .attribute_actor(&actor, store.settings());
            let node = store.create_page(parent.node.id, &slug, document, revision)?;
            let resolved = store.resolve(site.id, &path)?;
            println!(
                "{} created '{}' (node {})",
                "ok:".green().bold(),
                resolved.path_string(),
                node.id
            );
            Ok(())
        }
        Command::Edit {
            path,
            title,
            content,
            message,
        } => {
            let store = Store::open()?;
            let site = store.find_site(&cli.site)?;
            let resolved = store.resolve(site.id, &path)?;
            let document_id = bound_document(&resolved)?;
            check_write_node(&store, document_id, &actor)?;

            let current = store.current_revision(document_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("document {} has no revisions", document_id))
            })?;
            let mut input = RevisionInput::inheriting(&current);
            if let Some(title) = title {
                input.title = title;
            }
            if let Some(content) = content {
                input.content = content;
            }
            let input = input
                .with_message(&message)
                .attribute_actor(&actor, store.settings());
            let revision = store.add_revision(document_id, input)?;
            println!(
                "{} revision {} of '{}'",
                "ok:".green().bold(),
                revision.revision_number,
                revision.title
            );
            Ok(())
        }
        Command::Show { path, raw } => {
            let store = Store::open()?;
            let site = store.find_site(&cli.site)?;
            let resolved = store.resolve(site.id, &path)?;
            let document_id = bound_document(&resolved)?;
            if !store.can_read(document_id, &actor)? {
                return Err(StoreError::Precondition(
                    "read access denied".to_string(),
                ));
            }
            let current = store.current_revision(document_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("document {} has no revisions", document_id))
            })?;
            println!(
                "{} {}",
                current.title.bold(),
                format!("(r{})", current.revision_number).dimmed()
            );
            if raw {
                println!("{}", current.content);
            } else {
                println!("{}", store.sanitizer().render(&current.content));
            }
            Ok(())
        }
        Command::Log { path } => {
            let store = Store::open()?;
            let site = store.find_site(&cli.site)?;
            let resolved = store.resolve(site.id, &path)?;
            let document_id = bound_document(&resolved)?;
            for revision in store.revisions(document_id)?.iter().rev() {
                let author = match revision.user_id {
                    Some(user_id) => format!("user {}", user_id),
                    None => "anonymous".to_string(),
                };
                let mut flags = String::new();
                if revision.deleted {
                    flags.push_str(" [deleted]");
                }
                if revision.locked {
                    flags.push_str(" [locked]");
                }
                println!(
                    "{} {} {} {}{}",
                    format!("r{}", revision.revision_number).yellow(),
                    revision.created_at.dimmed(),
                    author,
                    revision.user_message,
                    flags.red()
                );
            }
            Ok(())
        }
        Command::Tree => {
            let store = Store::open()?;
            let site = store.find_site(&cli.site)?;
            let root = store.root(site.id)?;
            print_node(&store, &root, 0)?;
            for (node, depth) in store.descendants(root.id)? {
                print_node(&store, &node, depth)?;
            }
            Ok(())
        }
        Command::Rm { path, force } => {
            let store = Store::open()?;
            let site = store.find_site(&cli.site)?;
            let resolved = store.resolve(site.id, &path)?;
            let document_id = bound_document(&resolved)?;
            if !store.can_delete(document_id, &actor)? {
                return Err(StoreError::Precondition(
                    "delete access denied".to_string(),
                ));
            }
            if !force {
                return Err(StoreError::Precondition(format!(
                    "this deletes '{}' and its whole subtree; pass --force to proceed",
                    resolved.path_string()
                )));
            }
            let deleted = store.delete_subtree(resolved.node.id)?;
            println!(
                "{} deleted {} page(s) under '{}'",
                "ok:".green().bold(),
                deleted,
                path
            );
            Ok(())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init() -> espalier::Result<()> {
    let dir = std::path::Path::new(".espalier");
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Connection(format!("cannot create .espalier: {}", e)))?;
    }
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        let defaults = toml::to_string_pretty(&espalier::Settings::default())
            .unwrap_or_default();
        std::fs::write(&config_path, defaults)
            .map_err(|e| StoreError::Connection(format!("cannot write config: {}", e)))?;
    }
    let _store = Store::open()?;
    println!(
        "{} initialized page store, schema {}",
        "ok:".green().bold(),
        CURRENT_SCHEMA
    );
    Ok(())
}

fn bound_document(resolved: &ResolvedPath) -> espalier::Result<i32> {
    resolved.node.document_id.ok_or_else(|| {
        StoreError::NotFound(format!("tree node {} has no bound document", resolved.node.id))
    })
}

fn check_write(store: &Store, parent: &ResolvedPath, actor: &Actor) -> espalier::Result<()> {
    let document_id = bound_document(parent)?;
    check_write_node(store, document_id, actor)
}

fn check_write_node(store: &Store, document_id: i32, actor: &Actor) -> espalier::Result<()> {
    if !store.can_write(document_id, actor)? {
        return Err(StoreError::Precondition("write access denied".to_string()));
    }
    Ok(())
}

fn print_node(store: &Store, node: &espalier::TreeNode, depth: u32) -> espalier::Result<()> {
    let title = match node.document_id {
        Some(document_id) => store
            .current_revision(document_id)?
            .map(|r| {
                if r.deleted {
                    format!("{} {}", r.title, "[deleted]".red())
                } else {
                    r.title
                }
            })
            .unwrap_or_default(),
        None => String::new(),
    };
    let slug = node.slug.as_deref().unwrap_or("(root)");
    let indent = "  ".repeat(depth as usize);
    println!("{}{} {}", indent, slug.cyan(), title.dimmed());
    Ok(())
}

fn title_from_slug(slug: &str) -> String {
    let spaced = slug.replace(['-', '_'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}
