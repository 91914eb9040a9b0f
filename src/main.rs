//! Command‑line interface for droidspec.
//!
//! Reads a buildozer-style Android build manifest, reports problems with it,
//! prints it in canonical form, lists the assets it would bundle and serves
//! the packages the packager produced.

use clap::{Parser, Subcommand};
use colored::*;
use droidspec::android::{self, NdkVersion, qualified_permission};
use droidspec::manifest::{lost_on_rewrite, resolve_path};
use droidspec::{ManifestError, ParseOptions, Parsed, assets, manifest_dir, validate};
use hyper::header::HeaderValue;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use include_dir::{Dir, include_dir};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tokio::fs;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

/// Embedded template directory - bundled at compile time
static TEMPLATE_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/template");

/// Name of the manifest file inside the template directory.
const TEMPLATE_MANIFEST: &str = "buildozer.spec";

/// Package formats the packager writes to `bin_dir`.
const ARTIFACT_EXTENSIONS: &[&str] = &["apk", "aab"];

/// droidspec top‑level arguments.
#[derive(Parser)]
#[command(name = "droidspec", version, about = "Check, normalize and inspect buildozer-style Android build manifests", long_about = None)]
struct Cli {
    /// Manifest to operate on.
    #[arg(long, short = 'f', global = true, env = "DROIDSPEC_FILE", default_value = "buildozer.spec")]
    file: PathBuf,
    /// Profile whose `[section@profile]` overrides are applied.
    #[arg(long, short = 'p', global = true, env = "DROIDSPEC_PROFILE")]
    profile: Option<String>,
    /// Print debug output regardless of `[buildozer] log_level`.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands supported by the CLI.
#[derive(Subcommand)]
enum Commands {
    /// Parse and validate the manifest and the paths it references.
    Check {
        /// Treat warnings as errors.
        #[arg(long)]
        strict: bool,
    },
    /// Print the resolved manifest.
    Show {
        /// Emit JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Print the manifest in canonical form.
    Fmt {
        /// Rewrite the manifest file in place.
        #[arg(long, conflicts_with = "check")]
        write: bool,
        /// Fail if the manifest is not already in canonical form.
        #[arg(long)]
        check: bool,
        /// Rewrite even when profiles, placeholders or other sections would be lost.
        #[arg(long, requires = "write")]
        force: bool,
    },
    /// List the files that would be bundled from source.dir.
    Assets,
    /// Write the default manifest.
    Init {
        /// Package name of the new application.
        #[arg(long, default_value = "myapp")]
        name: String,
        /// Display title of the new application.
        #[arg(long, default_value = "My Application")]
        title: String,
        /// Overwrite an existing manifest.
        #[arg(long)]
        force: bool,
    },
    /// Compare the manifest's SDK and NDK requirements with the local install.
    Doctor,
    /// Serve the packages in bin_dir over HTTP.
    Serve {
        /// Port to listen on.  Defaults to 8000.
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Directory to serve instead of `[buildozer] bin_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        log::set_level(2);
    }
    let file = cli.file.as_path();
    let profile = cli.profile.as_deref();
    let result = match cli.command {
        Commands::Check { strict } => handle_check(file, profile, strict, cli.verbose).await,
        Commands::Show { json } => handle_show(file, profile, json, cli.verbose).await,
        Commands::Fmt { write, check, force } => handle_fmt(file, write, check, force).await,
        Commands::Assets => handle_assets(file, profile, cli.verbose).await,
        Commands::Init { name, title, force } => handle_init(file, &name, &title, force).await,
        Commands::Doctor => handle_doctor(file, profile, cli.verbose).await,
        Commands::Serve { port, dir } => handle_serve(file, profile, port, dir, cli.verbose).await,
    };
    if let Err(err) = result {
        log::error(&format!("error: {}", err));
        std::process::exit(1);
    }
}

/// Colored logging helpers for consistent CLI output
mod log {
    use colored::*;
    use droidspec::{Diagnostic, Severity};
    use std::sync::atomic::{AtomicU8, Ordering};

    /// Mirrors `[buildozer] log_level`: 0 errors only, 1 info, 2 debug.
    static LEVEL: AtomicU8 = AtomicU8::new(1);

    pub fn set_level(level: u8) {
        LEVEL.store(level, Ordering::Relaxed);
    }

    fn enabled(level: u8) -> bool {
        LEVEL.load(Ordering::Relaxed) >= level
    }

    pub fn debug(msg: &str) {
        if enabled(2) {
            println!("{}", msg.bright_black());
        }
    }

    pub fn info(msg: &str) {
        if enabled(1) {
            println!("{}", msg.bright_blue());
        }
    }

    pub fn success(msg: &str) {
        if enabled(1) {
            println!("{}", msg.bright_green());
        }
    }

    pub fn warning(msg: &str) {
        println!("{}", msg.bright_yellow());
    }

    pub fn error(msg: &str) {
        eprintln!("{}", msg.bright_red());
    }

    pub fn step(msg: &str) {
        if enabled(1) {
            println!("{} {}", "→".bright_cyan(), msg.bright_white());
        }
    }

    pub fn header(msg: &str) {
        println!("{}", msg.bright_cyan().bold());
    }

    pub fn diagnostic(diagnostic: &Diagnostic) {
        match diagnostic.severity {
            Severity::Error => error(&diagnostic.to_string()),
            Severity::Warning => warning(&diagnostic.to_string()),
        }
    }
}

/// Reads and parses the manifest, honoring the profile and `APP_*` /
/// `BUILDOZER_*` environment overrides.
async fn load_manifest(
    file: &Path,
    profile: Option<&str>,
    verbose: bool,
) -> Result<Parsed, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(file)
        .await
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    let mut options = ParseOptions::from_env();
    options.profile = profile.map(str::to_string);
    options.base_dir = Some(manifest_dir(file));

    let parsed = match droidspec::parse_with(&contents, &options) {
        Ok(parsed) => parsed,
        Err(ManifestError::Validation(errors)) => {
            for diagnostic in &errors {
                log::diagnostic(diagnostic);
            }
            return Err(format!("{} has {} error(s)", file.display(), errors.len()).into());
        }
        Err(err) => return Err(format!("{}: {}", file.display(), err).into()),
    };

    if !verbose {
        log::set_level(parsed.manifest.build.log_level);
    }
    if let Some(profile) = profile {
        if parsed.profile_sections.is_empty() {
            log::warning(&format!("Profile '{}' matches no section", profile));
        }
    }
    for section in &parsed.profile_sections {
        log::debug(&format!("Applied profile section [{}]", section));
    }
    for var in &parsed.env_overrides {
        log::debug(&format!("Applied environment override {}", var));
    }
    Ok(parsed)
}

/// True when running with uid 0 on Unix.
fn is_root() -> bool {
    cfg!(unix) && root_from_id_output(Command::new("id").arg("-u").output())
}

/// Reads the result of `id -u`; anything but a clean `0` counts as not root.
fn root_from_id_output(result: std::io::Result<Output>) -> bool {
    match result {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).trim() == "0",
        Ok(output) => {
            log::warning(&format!("`id -u` failed ({}); skipping the root check", output.status));
            false
        }
        Err(err) => {
            log::warning(&format!("Could not run `id -u` ({}); skipping the root check", err));
            false
        }
    }
}

/// Validates the manifest and the files it points at.
async fn handle_check(
    file: &Path,
    profile: Option<&str>,
    strict: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_manifest(file, profile, verbose).await?;
    let manifest = &parsed.manifest;
    log::step(&format!("Checking {}", file.display()));

    let mut diagnostics = parsed.warnings.clone();
    let mut path_diagnostics = validate::check_paths(manifest, &manifest_dir(file));
    validate::locate(&mut path_diagnostics, &parsed.document);
    diagnostics.extend(path_diagnostics);

    if manifest.build.warn_on_root && is_root() {
        log::warning("Running as root; packagers refuse to build as root unless [buildozer] warn_on_root = 0");
    }

    for diagnostic in &diagnostics {
        log::diagnostic(diagnostic);
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    let warnings = diagnostics.len() - errors;

    if errors > 0 || (strict && warnings > 0) {
        return Err(format!(
            "{} has {} error(s) and {} warning(s)",
            file.display(),
            errors,
            warnings
        )
        .into());
    }

    log::success(&format!(
        "✓ {} is valid: {} {} ({} warning(s))",
        file.display(),
        manifest.identifier(),
        manifest.version,
        warnings
    ));
    Ok(())
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

/// Prints the resolved manifest.
async fn handle_show(
    file: &Path,
    profile: Option<&str>,
    json: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_manifest(file, profile, verbose).await?;
    let m = &parsed.manifest;

    if json {
        println!("{}", serde_json::to_string_pretty(m)?);
        return Ok(());
    }

    for warning in &parsed.warnings {
        log::diagnostic(warning);
    }

    let ndk = match NdkVersion::parse(&m.android.ndk) {
        Some(version) => format!("{} ({})", m.android.ndk, version),
        None => m.android.ndk.clone(),
    };
    let requirements: Vec<String> = m.requirements.iter().map(|r| r.to_string()).collect();
    let permissions: Vec<String> = m.permissions.iter().map(|p| qualified_permission(p)).collect();
    let optional_path = |path: &Option<PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    log::header(&format!("{} {}", m.title, m.version));
    println!("{}", "═".repeat(60));
    let rows = [
        ("Identifier", m.identifier()),
        ("Source dir", m.source.dir.display().to_string()),
        ("Extensions", join_or_dash(&m.source.include_exts)),
        ("Requirements", join_or_dash(&requirements)),
        ("Permissions", join_or_dash(&permissions)),
        ("Orientation", m.orientation.to_string()),
        ("Fullscreen", m.fullscreen.to_string()),
        ("Icon", optional_path(&m.icon)),
        ("Presplash", optional_path(&m.presplash)),
        ("Target API", m.android.target_api.to_string()),
        ("Minimum API", m.android.min_api.to_string()),
        ("NDK", ndk),
        ("Archs", join_or_dash(&m.android.archs)),
        ("Bin dir", m.build.bin_dir.display().to_string()),
    ];
    for (label, value) in rows {
        println!("{:<14} {}", format!("{}:", label).bright_white(), value);
    }
    if !m.extra.is_empty() {
        println!("{}", "Other keys:".bright_white());
        for (key, value) in &m.extra {
            println!("  {} = {}", key.bright_black(), value);
        }
    }
    Ok(())
}

/// Prints, writes or checks the canonical form of the manifest.
///
/// Profiles and environment overrides are not applied; the output reflects
/// the file alone. `--write` refuses to drop anything the canonical form
/// cannot hold unless `force` is set.
async fn handle_fmt(file: &Path, write: bool, check: bool, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(file)
        .await
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    let options = ParseOptions {
        base_dir: Some(manifest_dir(file)),
        ..ParseOptions::default()
    };
    let parsed = droidspec::parse_with(&contents, &options)
        .map_err(|e| format!("{}: {}", file.display(), e))?;
    let canonical = parsed.manifest.serialize();

    if check {
        if contents != canonical {
            return Err(format!("{} is not in canonical form; run `droidspec fmt --write`", file.display()).into());
        }
        log::success(&format!("✓ {} is canonical", file.display()));
    } else if write {
        let lost = lost_on_rewrite(&parsed.document);
        for item in &lost {
            log::warning(&format!("Not kept by the rewrite: {}", item));
        }
        if !lost.is_empty() && !force {
            return Err(format!(
                "{}: rewriting would drop {} item(s); pass --force to rewrite anyway",
                file.display(),
                lost.len()
            )
            .into());
        }
        if contents.lines().any(|l| l.trim_start().starts_with(['#', ';'])) {
            log::warning("Comments are not preserved in canonical form");
        }
        fs::write(file, &canonical).await?;
        log::success(&format!("✓ Rewrote {}", file.display()));
    } else {
        print!("{}", canonical);
    }
    Ok(())
}

/// Human-readable byte count.
fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= 1_048_576 => format!("{:.2} MB", b as f64 / 1_048_576.0),
        b if b >= 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{} B", b),
    }
}

/// Lists the files a packager would bundle.
async fn handle_assets(file: &Path, profile: Option<&str>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_manifest(file, profile, verbose).await?;
    let set = assets::discover(&parsed.manifest, &manifest_dir(file))?;

    log::header(&format!("Assets under {}", set.root.display()));
    for asset in &set.assets {
        println!("  {:>10}  {}", format_size(asset.size).bright_black(), asset.path.display());
    }
    log::success(&format!(
        "{} file(s), {} total",
        set.assets.len(),
        format_size(set.total_size())
    ));
    Ok(())
}

/// Applies placeholder replacement to the bundled template.
fn apply_template_replacements(content: &str, name: &str, title: &str) -> String {
    content
        .replace("title = My Application", &format!("title = {}", title))
        .replace("package.name = myapp", &format!("package.name = {}", name))
}

/// Writes the bundled default manifest.
async fn handle_init(file: &Path, name: &str, title: &str, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if file.exists() && !force {
        return Err(format!("{} already exists; pass --force to overwrite", file.display()).into());
    }
    let template = TEMPLATE_DIR
        .get_file(TEMPLATE_MANIFEST)
        .and_then(|f| f.contents_utf8())
        .ok_or("bundled manifest template is missing")?;
    let contents = apply_template_replacements(template, name, &droidspec::interpolate::escape(title));

    // Refuse to write a manifest that would not pass `check`.
    droidspec::parse(&contents).map_err(|e| format!("invalid --name or --title: {}", e))?;

    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(file, contents).await?;

    log::success(&format!("✓ Created {}", file.display()));
    println!("\nNext steps:");
    println!("  1. Edit {} (requirements, permissions, icon)", file.display());
    println!("  2. droidspec check");
    println!("  3. droidspec assets   # preview what gets bundled");
    Ok(())
}

/// Compares the manifest's platform requirements with the local install.
async fn handle_doctor(file: &Path, profile: Option<&str>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_manifest(file, profile, verbose).await?;
    let target = &parsed.manifest.android;

    println!("\ndroidspec doctor\n================\n");
    println!("Operating system: {}", std::env::consts::OS);

    println!("\nChecking Android SDK...");
    let sdk = android::detect_android_sdk();
    match &sdk {
        Some(sdk) => {
            println!("  ✓ Found Android SDK at: {}", sdk.display());
            for (label, api) in [("android.api", target.target_api), ("android.minapi", target.min_api)] {
                match android::installed_platform(sdk, api) {
                    Some(_) => println!("  ✓ Platform android-{} installed ({})", api, label),
                    None if label == "android.api" => println!(
                        "  ⚠️  Platform android-{} missing. Install with: sdkmanager \"platforms;android-{}\"",
                        api, api
                    ),
                    None => log::debug(&format!("  Platform android-{} not installed (only needed for testing)", api)),
                }
            }
        }
        None => println!("  ⚠️  Android SDK not found. Set ANDROID_SDK_ROOT or ANDROID_HOME."),
    }

    println!("\nChecking Android NDK...");
    let ndks = android::installed_ndks(sdk.as_deref());
    match NdkVersion::parse(&target.ndk) {
        Some(wanted) => {
            let matching = ndks.iter().find(|path| {
                path.file_name()
                    .is_some_and(|name| wanted.matches_install(&name.to_string_lossy()))
            });
            match matching {
                Some(path) => println!("  ✓ NDK {} found at: {}", wanted, path.display()),
                None => {
                    println!("  ⚠️  NDK {} (android.ndk = {}) not installed.", wanted, target.ndk);
                    for path in &ndks {
                        println!("     Installed: {}", path.display());
                    }
                }
            }
        }
        None => println!("  ⚠️  android.ndk = {:?} is not a recognized NDK version.", target.ndk),
    }

    println!("\nDoctor check complete. Review the messages above.");
    Ok(())
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ARTIFACT_EXTENSIONS.contains(&ext))
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

/// Finds packages below the serve directory, as paths relative to it.
fn find_artifacts(serve_dir: &Path) -> Vec<(String, u64)> {
    let mut found = Vec::new();
    for entry in WalkDir::new(serve_dir).min_depth(1).max_depth(3).into_iter().flatten() {
        if entry.file_type().is_file() && is_artifact(entry.path()) {
            if let Ok(rel_path) = entry.path().strip_prefix(serve_dir) {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                found.push((rel_path.to_string_lossy().replace('\\', "/"), size));
            }
        }
    }
    found
}

async fn serve_request(req: Request<Body>, serve_dir: PathBuf) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match (&method, path.as_str()) {
        (&Method::GET, "/") => {
            let mut listing = String::from("<html><head><title>droidspec package server</title></head><body><h1>Available packages</h1><ul>");
            for (rel_path, size) in find_artifacts(&serve_dir) {
                listing.push_str(&format!(
                    "<li><a href=\"/{}\"><strong>{}</strong></a> ({})</li>",
                    rel_path,
                    rel_path,
                    format_size(size)
                ));
            }
            listing.push_str("</ul></body></html>");
            Ok(Response::new(Body::from(listing)))
        }
        (&Method::GET, path) => {
            let trimmed = path.trim_start_matches('/');
            if trimmed.contains("..") {
                return Ok(respond(StatusCode::FORBIDDEN, "Forbidden: Invalid path"));
            }
            let canonical = match fs::canonicalize(serve_dir.join(trimmed)).await {
                Ok(canonical) => canonical,
                Err(_) => return Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
            };
            if !canonical.starts_with(&serve_dir) {
                return Ok(respond(StatusCode::FORBIDDEN, "Forbidden: Path traversal detected"));
            }
            let mut data = Vec::new();
            let read = match fs::File::open(&canonical).await {
                Ok(mut file) => file.read_to_end(&mut data).await,
                Err(_) => return Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
            };
            if read.is_err() {
                return Ok(respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"));
            }
            let mime = match canonical.extension().and_then(|s| s.to_str()) {
                Some("apk") => "application/vnd.android.package-archive",
                _ => "application/octet-stream",
            };
            let mut response = respond(StatusCode::OK, data);
            response
                .headers_mut()
                .insert(hyper::header::CONTENT_TYPE, HeaderValue::from_static(mime));
            Ok(response)
        }
        _ => Ok(respond(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")),
    }
}

/// Serves the packager's output directory on the given port.
async fn handle_serve(
    file: &Path,
    profile: Option<&str>,
    port: u16,
    dir: Option<PathBuf>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = match dir {
        Some(dir) => dir,
        None => {
            let parsed = load_manifest(file, profile, verbose).await?;
            resolve_path(&manifest_dir(file), &parsed.manifest.build.bin_dir)
        }
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).await?;
        log::info(&format!("Created directory: {}", dir.display()));
    }
    let serve_dir = fs::canonicalize(&dir).await?;

    let found = find_artifacts(&serve_dir);
    if found.is_empty() {
        log::warning("No .apk or .aab files found in the serve directory.");
    } else {
        log::success(&format!("Found {} package(s):", found.len()));
        for (rel_path, _) in &found {
            log::info(&format!("  - {}", rel_path));
        }
    }

    log::header(&format!("Serving {} on http://0.0.0.0:{}/", serve_dir.display(), port));
    let make_service = make_service_fn(move |_| {
        let serve_dir = serve_dir.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                serve_request(req, serve_dir.clone())
            }))
        }
    });
    let addr = ([0, 0, 0, 0], port).into();
    Server::bind(&addr).serve(make_service).await?;
    Ok(())
}
