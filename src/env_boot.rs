use dotenv::dotenv;

/// Load environment from `GAMESTATS_ENV_FILE` when set, else `.env` in the
/// current directory, else `.env` at the crate root. Missing files are not errors.
pub fn ensure_dotenv() {
    if let Ok(path) = std::env::var("GAMESTATS_ENV_FILE") {
        if dotenv::from_filename(path.trim()).is_ok() {
            return;
        }
    }
    if dotenv().is_ok() {
        return;
    }
    let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
    let _ = dotenv::from_filename(candidate);
}
