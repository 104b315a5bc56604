//! Project setup command: `arv init`.

use anyhow::{Context, Result};

use arv::config::{ARV_DIR, ArvConfig, ArvToml, CONFIG_FILE, StoreBackend};
use arv::session::db::SqliteStore;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    let arv_dir = project_dir.join(ARV_DIR);
    let config_path = arv_dir.join(CONFIG_FILE);
    let was_initialized = config_path.exists();

    std::fs::create_dir_all(&arv_dir)
        .with_context(|| format!("Failed to create {}", arv_dir.display()))?;
    if !was_initialized {
        ArvToml::default().save(&config_path)?;
    }

    let config = ArvConfig::new(project_dir.to_path_buf())?;
    let images_dir = config.images_dir();
    std::fs::create_dir_all(&images_dir)
        .with_context(|| format!("Failed to create image directory: {}", images_dir.display()))?;
    if config.toml.store.backend == StoreBackend::Sqlite {
        SqliteStore::open(&config.db_path())?;
    }

    if was_initialized {
        println!("arv project already initialized at {}", arv_dir.display());
        println!("Directory structure verified.");
        return Ok(());
    }

    println!("Initialized arv project at {}", arv_dir.display());
    println!();
    println!("Created:");
    println!("  .arv/");
    println!("  ├── arv.toml   # Configuration (use `arv config show`)");
    println!("  └── arv.db     # Session database");
    println!("  {}/", images_dir.strip_prefix(&config.project_dir).unwrap_or(images_dir.as_path()).display());
    println!();
    println!("Next steps:");
    println!("  1. Put at least two .jpg/.png/.gif images in the image directory");
    println!("  2. Set ANTHROPIC_API_KEY, or set [judge] backend = \"random\"");
    println!("  3. Run `arv serve`, or `arv create` to start a session");

    Ok(())
}
