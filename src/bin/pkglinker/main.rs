//! pkglinker CLI - inspect package files and exercise the async loader.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pkglinker::async_loading::{AsyncLoader, LoadStatus};
use pkglinker::linker::{LinkerId, LoadContext};
use pkglinker::stream::{DirectoryFileSystem, MemoryFileSystem};
use pkglinker::util::LoaderConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_env("PKGLINKER_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "warn";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    match filtered_args[0] {
        "info" | "i" => cmd_table(&filtered_args, "info", print_info),
        "names" | "n" => cmd_table(&filtered_args, "names", print_names),
        "imports" => cmd_table(&filtered_args, "imports", print_imports),
        "exports" | "e" => cmd_table(&filtered_args, "exports", print_exports),
        "depends" | "d" => cmd_table(&filtered_args, "depends", print_depends),
        "load" | "l" => cmd_load(&filtered_args[1..]),
        "version" | "--version" => {
            println!(
                "pkglinker {} (built {} {})",
                env!("CARGO_PKG_VERSION"),
                env!("PKGLINKER_BUILD_DATE"),
                env!("PKGLINKER_BUILD_TIME")
            );
        }
        "help" | "h" | "-h" | "--help" => print_help(),

        // Default: if file exists, show info; otherwise error
        _ => {
            if Path::new(filtered_args[0]).exists() {
                cmd_table(&["info", filtered_args[0]], "info", print_info);
            } else {
                eprintln!("Unknown command: {}", filtered_args[0]);
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    }
}

fn print_help() {
    println!("pkglinker - package file toolkit");
    println!();
    println!("USAGE:");
    println!("    pkglinker [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info     <file>                 Show summary, versions and table sizes");
    println!("    n, names    <file>                 List the name table");
    println!("       imports  <file>                 List imports with full paths");
    println!("    e, exports  <file>                 List exports with class and serial range");
    println!("    d, depends  <file>                 List per-export dependencies");
    println!("    l, load     <package> --root <dir> [--budget-ms N]");
    println!("                                       Load a package asynchronously");
    println!("    h, help                            Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Debug logging");
    println!("    -vv, --trace     Trace logging");
    println!("    -q, --quiet      Errors only");
    println!();
    println!("ENVIRONMENT:");
    println!("    PKGLINKER_LOG    Log filter, overrides -v/-q (e.g. pkglinker=debug)");
}

/// Open `path` as a standalone package and drive its linker to the end.
fn open_package(path: &str) -> pkglinker::Result<(LoadContext, LinkerId)> {
    let data = std::fs::read(path).map_err(|_| pkglinker::Error::FileNotFound(PathBuf::from(path)))?;
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Package")
        .to_string();
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert_package(&stem, data);
    let mut cx = LoadContext::new(fs, LoaderConfig::default());
    let id = cx.get_package_linker(&stem)?;
    cx.finish_linker(id)?;
    Ok((cx, id))
}

fn cmd_table(args: &[&str], command: &str, print: fn(&LoadContext, LinkerId)) {
    if args.len() < 2 {
        eprintln!("Error: missing file argument");
        eprintln!("Usage: pkglinker {command} <file.pkg>");
        std::process::exit(1);
    }
    match open_package(args[1]) {
        Ok((cx, id)) => print(&cx, id),
        Err(e) => {
            eprintln!("Failed to open {}: {}", args[1], e);
            std::process::exit(1);
        }
    }
}

fn linker(cx: &LoadContext, id: LinkerId) -> &pkglinker::linker::Linker {
    match cx.linker(id) {
        Some(linker) => linker,
        None => {
            eprintln!("Linker was detached");
            std::process::exit(1);
        }
    }
}

fn print_info(cx: &LoadContext, id: LinkerId) {
    let linker = linker(cx, id);
    let summary = linker.summary();
    println!("Package: {}", cx.names().resolve(linker.package_name()));
    println!("File version: {} (licensee {})", summary.file_version, summary.licensee_version);
    println!("Engine version: {}", summary.engine_version);
    println!("Cooked content version: {}", summary.cooked_content_version);
    println!("Folder: {}", summary.folder_name);
    println!("Package flags: {:#010x}", summary.package_flags.0);
    println!("Guid: {}", summary.guid);
    println!("Header size: {} bytes", summary.total_header_size);
    println!("File size: {} bytes", linker.file_size());
    println!();
    println!("Names:   {:>8}", summary.name_count);
    println!("Imports: {:>8}", summary.import_count);
    println!("Exports: {:>8}", summary.export_count);
    println!("Generations: {}", summary.generations.len());
    if summary.is_compressed() {
        println!();
        println!("Compression: {:#x}, {} chunks", summary.compression_flags.bits(), summary.compressed_chunks.len());
        for (i, chunk) in summary.compressed_chunks.iter().enumerate() {
            println!(
                "  [{i:>3}] {:>10} -> {:>10} bytes at {}",
                chunk.compressed_size, chunk.uncompressed_size, chunk.compressed_offset
            );
        }
    }
    println!();
    println!("Header bytes read: {}", linker.bytes_read());
}

fn print_names(cx: &LoadContext, id: LinkerId) {
    for (i, &name) in linker(cx, id).names().iter().enumerate() {
        println!("{i:>6}  {}", cx.names().resolve(name));
    }
}

fn print_imports(cx: &LoadContext, id: LinkerId) {
    let linker = linker(cx, id);
    for (i, import) in linker.imports().iter().enumerate() {
        println!(
            "{:>6}  {}.{}  {}",
            -(i as i64) - 1,
            cx.names().resolve(import.class_package),
            cx.names().resolve(import.class_name),
            linker.import_path(cx.names(), i)
        );
    }
}

fn print_exports(cx: &LoadContext, id: LinkerId) {
    let linker = linker(cx, id);
    for (i, export) in linker.exports().iter().enumerate() {
        let class = linker.export_class_name(i).map_or_else(|| "?".to_string(), |n| cx.names().resolve(n));
        println!(
            "{:>6}  {:<24} {}  [{}+{}]{}",
            i + 1,
            class,
            linker.export_path(cx.names(), i),
            export.serial_offset,
            export.serial_size,
            if export.is_forced() { " forced" } else { "" }
        );
    }
}

fn print_depends(cx: &LoadContext, id: LinkerId) {
    let linker = linker(cx, id);
    for i in 0..linker.exports().len() {
        let depends = linker.depends(i);
        if depends.is_empty() {
            continue;
        }
        println!("{}", linker.export_path(cx.names(), i));
        for &index in depends {
            let path = match (index.to_import(), index.to_export()) {
                (Some(import), _) => linker.import_path(cx.names(), import),
                (_, Some(export)) => linker.export_path(cx.names(), export),
                _ => "None".to_string(),
            };
            println!("    {:>10}  {path}", index.to_string());
        }
    }
}

fn cmd_load(args: &[&str]) {
    let mut package = None;
    let mut root = None;
    let mut budget_ms = 5u64;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--root" | "-r" => {
                i += 1;
                root = args.get(i).map(PathBuf::from);
            }
            "--budget-ms" | "-b" => {
                i += 1;
                budget_ms = match args.get(i).and_then(|s| s.parse().ok()) {
                    Some(ms) => ms,
                    None => {
                        eprintln!("Error: --budget-ms needs a number");
                        std::process::exit(1);
                    }
                };
            }
            other => package = Some(other),
        }
        i += 1;
    }
    let (Some(package), Some(root)) = (package, root) else {
        eprintln!("Error: missing arguments");
        eprintln!("Usage: pkglinker load <package> --root <dir> [--budget-ms N]");
        std::process::exit(1);
    };

    let fs = Arc::new(DirectoryFileSystem::new([root]));
    let mut cx = LoadContext::new(fs, LoaderConfig::default());
    let mut loader = AsyncLoader::new();
    loader.load_package_async(
        package,
        Some(Box::new(|name, result| match result {
            Ok(_) => println!("Loaded {name}"),
            Err(e) => eprintln!("Failed to load {name}: {e}"),
        })),
    );

    let start = Instant::now();
    let mut ticks = 0u64;
    loop {
        ticks += 1;
        let status = loader.process(&mut cx, Some(Duration::from_millis(budget_ms)));
        if let Some(percent) = loader.load_percentage(&cx, package) {
            tracing::debug!(tick = ticks, percent = format!("{percent:.1}"), "progress");
        }
        if status == LoadStatus::Finished {
            break;
        }
    }
    println!();
    println!("Ticks: {ticks} ({budget_ms} ms budget)");
    println!("Elapsed: {:.2?}", start.elapsed());
    println!("Objects in memory: {}", cx.objects().len());
    for linker in cx.linkers() {
        println!(
            "  {:<24} {:>6} exports {:>10} bytes read",
            cx.names().resolve(linker.package_name()),
            linker.exports().len(),
            linker.bytes_read()
        );
    }
}
