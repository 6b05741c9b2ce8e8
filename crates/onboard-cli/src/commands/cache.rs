use super::{json_pretty, Context, EXIT_SUCCESS};
use onboard_schema::RepoRef;

pub fn stats(ctx: &Context) -> Result<u8, String> {
    let settings = ctx.settings()?;
    let cache = ctx.cache(&settings)?;
    let stats = cache.stats().map_err(|e| format!("cache: {e}"))?;

    if ctx.json {
        let payload = serde_json::json!({
            "dir": cache.dir(),
            "files": stats.files,
            "total_size": stats.total_size,
            "ttl_secs": cache.ttl().as_secs(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("cache dir:  {}", cache.dir().display());
        println!("manifests:  {}", stats.files);
        println!("total size: {}", human_size(stats.total_size));
        println!("ttl:        {}h", cache.ttl().as_secs() / 3600);
    }
    Ok(EXIT_SUCCESS)
}

pub fn clear(ctx: &Context, repo: Option<&str>) -> Result<u8, String> {
    let settings = ctx.settings()?;
    let cache = ctx.cache(&settings)?;

    let removed = match repo {
        Some(input) => {
            let repo = RepoRef::parse(input).map_err(|e| e.to_string())?;
            usize::from(
                cache
                    .clear(&repo.owner, &repo.repo)
                    .map_err(|e| format!("cache: {e}"))?,
            )
        }
        None => cache.clear_all().map_err(|e| format!("cache: {e}"))?,
    };

    if ctx.json {
        println!("{}", json_pretty(&serde_json::json!({ "removed": removed }))?);
    } else {
        println!("removed {removed} cached manifest(s)");
    }
    Ok(EXIT_SUCCESS)
}

fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < KIB * KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MiB", bytes as f64 / (KIB * KIB) as f64)
    }
}
