//! vitte-cli/src/lib.rs — CLI lib pour Vitte
//!
//! Sous-commandes :
//!   - build  : compile un projet depuis un manifest vitte.toml (vérifie
//!              que chaque source assemble, sans persister de bytecode —
//!              voir SPEC_FULL.md §10.A, le vrai compilateur source est
//!              hors scope)
//!   - run    : exécute un fichier source via `vitte-vm` + l'assembleur
//!              `vitte-compiler`, en exerçant le VM de bout en bout
//!   - disasm : compile un fichier et affiche ses instructions registre
//!   - test   : exécute les fichiers `.vita` d'un dossier `tests/` et
//!              compte succès/échecs
//!
//! Conçu pour compiler même si les crates core/compiler/vm ne sont pas
//! activées : les intégrations sont sous features facultatives (désactivées,
//! chaque sous-commande retombe sur un message "squelette").

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Point d'entrée du binaire (à appeler depuis src/main.rs)
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Build { manifest, release } => cmd_build(manifest, release),
        Cmd::Run { file } => cmd_run(file),
        Cmd::Disasm { file } => cmd_disasm(file),
        Cmd::Test { manifest, filter } => cmd_test(manifest, filter),
    }
}

#[derive(Parser, Debug)]
#[command(name = "vitte", version, about = "Vitte language tool")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compile le projet à partir d'un manifest vitte.toml
    Build {
        /// Chemin vers vitte.toml
        #[arg(default_value = "vitte.toml")]
        manifest: PathBuf,
        /// Profil release (opt-level 3, LTO…)
        #[arg(long)]
        release: bool,
    },
    /// Exécute un fichier source `.vita` (assembleur registre)
    Run {
        /// Fichier source
        file: PathBuf,
    },
    /// Désassemble un fichier source (compile puis affiche ses instructions)
    Disasm {
        /// Fichier source à désassembler
        file: PathBuf,
    },
    /// Lance les tests du projet (découverte dans tests/)
    Test {
        /// Chemin du manifest
        #[arg(default_value = "vitte.toml")]
        manifest: PathBuf,
        /// Filtre nom de test
        #[arg(long)]
        filter: Option<String>,
    },
}

/// Manifest minimal pour un projet Vitte.
#[derive(Debug, Deserialize)]
struct Manifest {
    package: Package,
    #[serde(default)]
    bin: Option<Bin>,
    #[serde(default)]
    lib: Option<Lib>,
}

#[derive(Debug, Deserialize)]
struct Package {
    name: String,
    #[serde(default = "default_version")]
    version: String,
}

#[derive(Debug, Deserialize)]
struct Bin {
    main: String,
}

#[derive(Debug, Deserialize)]
struct Lib {
    path: String,
}

fn default_version() -> String {
    "0.1.0".into()
}

fn read_manifest(path: &Utf8Path) -> Result<Manifest> {
    let s = fs::read_to_string(path).with_context(|| format!("lecture {}", path))?;
    toml::from_str(&s).with_context(|| "TOML invalide")
}

fn module_name_of(path: &Utf8Path) -> String {
    path.file_stem().unwrap_or("main").to_string()
}

#[cfg(feature = "vm")]
mod embed {
    //! L'hôte et la configuration VM partagés par `run`/`disasm`/`test`
    //! (SPEC_FULL.md §10.D "Configuration").

    use tracing::warn;
    use vitte_compiler::AssemblingCompiler;
    use vitte_vm::{ErrorKind, Host, InterpretResult, Vm, VmConfig};

    /// Hôte par défaut du CLI : stdout direct, pas de modules/classes
    /// étrangères, erreurs relayées via `tracing` et `stderr` — l'équivalent
    /// du `DefaultHost` de la bibliothèque mais qui logge (SPEC_FULL.md §10.C).
    pub struct StdHost;

    impl Host for StdHost {
        fn write(&mut self, text: &str) {
            print!("{text}");
        }

        fn error(&mut self, kind: ErrorKind, module: Option<&str>, line: u32, msg: &str) {
            let module = module.unwrap_or("?");
            match kind {
                ErrorKind::Compile => {
                    warn!(module, line, "compile error: {msg}");
                    eprintln!("[{module}:{line}] Compile Error: {msg}");
                }
                ErrorKind::Runtime => {
                    warn!(module, "runtime error: {msg}");
                    eprintln!("{module}: {msg}");
                }
                ErrorKind::StackTrace => {
                    eprintln!("[{module}:{line}] in {msg}");
                }
            }
        }
    }

    pub fn new_vm() -> Vm {
        Vm::new(VmConfig::default(), Box::new(StdHost)).with_compiler(Box::new(AssemblingCompiler::new()))
    }

    pub use vitte_vm::InterpretResult as Outcome;
}

fn cmd_build(manifest: PathBuf, release: bool) -> Result<()> {
    let manifest = Utf8PathBuf::from_path_buf(manifest).map_err(|_| anyhow!("chemin invalide"))?;
    let m = read_manifest(&manifest)?;
    let root = manifest.parent().context("manifest sans parent ?")?.to_path_buf();

    let profile = if release { "release" } else { "dev" };
    eprintln!("🏗️  Build `{}` v{}  (profile: {profile})", m.package.name, m.package.version);

    let mut checked_any = false;

    if let Some(lib) = &m.lib {
        let lib_path = root.join(&lib.path);
        ensure_exists(&lib_path, "lib")?;
        checked_any |= check_one_source(&lib_path)?;
    }

    if let Some(bin) = &m.bin {
        let main_path = root.join(&bin.main);
        ensure_exists(&main_path, "bin")?;
        checked_any |= check_one_source(&main_path)?;
    }

    if !checked_any {
        eprintln!("⚠️  Rien à construire (ni `lib`, ni `bin` dans le manifest).");
    }

    Ok(())
}

#[cfg(all(feature = "compiler", feature = "vm"))]
fn check_one_source(path: &Utf8Path) -> Result<bool> {
    let source = fs::read_to_string(path).with_context(|| format!("lecture {}", path))?;
    let mut vm = embed::new_vm();
    let name = module_name_of(path);
    match vm.compile(&name, &source) {
        Ok(_) => {
            eprintln!("✅  `{name}` assemble sans erreur");
            Ok(true)
        }
        Err(e) => Err(anyhow!("{name}: {e}")),
    }
}

#[cfg(not(all(feature = "compiler", feature = "vm")))]
fn check_one_source(_path: &Utf8Path) -> Result<bool> {
    eprintln!("ℹ️  feature `compiler` absente → source non vérifiée (squelette).");
    Ok(false)
}

fn cmd_run(file: PathBuf) -> Result<()> {
    let file = Utf8PathBuf::from_path_buf(file).map_err(|_| anyhow!("chemin invalide"))?;
    ensure_exists(&file, "source")?;

    #[cfg(feature = "vm")]
    {
        let source = fs::read_to_string(&file)?;
        let name = module_name_of(&file);
        let mut vm = embed::new_vm();
        return match vm.interpret(&name, &source) {
            embed::Outcome::Success => {
                eprintln!("✅  `{name}` terminé");
                Ok(())
            }
            embed::Outcome::CompileError => Err(anyhow!("`{name}`: compile error (voir ci-dessus)")),
            embed::Outcome::RuntimeError => Err(anyhow!("`{name}`: runtime error (voir ci-dessus)")),
        };
    }
    #[cfg(not(feature = "vm"))]
    {
        let _ = file;
        Err(anyhow!("La feature `vm` n'est pas activée (squelette)."))
    }
}

fn cmd_disasm(file: PathBuf) -> Result<()> {
    let file = Utf8PathBuf::from_path_buf(file).map_err(|_| anyhow!("chemin invalide"))?;
    ensure_exists(&file, "source")?;

    #[cfg(feature = "vm")]
    {
        use vitte_core::object::ObjData;

        let source = fs::read_to_string(&file)?;
        let name = module_name_of(&file);
        let mut vm = embed::new_vm();
        let closure_ref = vm.compile(&name, &source).map_err(|e| anyhow!("{name}: {e}"))?;
        let ObjData::Closure(closure) = vm.heap().get(closure_ref) else {
            return Err(anyhow!("compiled module did not yield a closure"));
        };
        let ObjData::Fn(proto) = vm.heap().get(closure.function) else {
            return Err(anyhow!("closure did not yield a function prototype"));
        };

        println!("== {} ({}) ==", proto.debug_name, name);
        println!("arity={} max_slots={} upvalues={}", proto.arity, proto.max_slots, proto.num_upvalues());
        for (i, instr) in proto.code.iter().enumerate() {
            let line = proto.lines.get(i).copied().unwrap_or(0);
            println!("{i:04}  L{line:<4}  {instr:?}");
        }
        if !proto.constants.is_empty() {
            println!("-- constants --");
            for (i, k) in proto.constants.iter().enumerate() {
                println!("  [{i}] {k:?}");
            }
        }
        return Ok(());
    }
    #[cfg(not(feature = "vm"))]
    {
        let _ = file;
        Err(anyhow!("La feature `vm` n'est pas activée (squelette)."))
    }
}

fn cmd_test(manifest: PathBuf, filter: Option<String>) -> Result<()> {
    let manifest = Utf8PathBuf::from_path_buf(manifest).map_err(|_| anyhow!("chemin invalide"))?;
    let root = manifest.parent().context("manifest sans parent ?")?.to_path_buf();
    let tests_dir = root.join("tests");
    if !tests_dir.exists() {
        eprintln!("ℹ️  Pas de dossier `tests/` → rien à faire.");
        return Ok(());
    }

    let mut passed = 0usize;
    let mut failed = 0usize;
    for entry in walk(&tests_dir)? {
        if entry.extension().map(|e| e == "vita").unwrap_or(false) {
            if let Some(f) = &filter {
                if !entry.to_string_lossy().contains(f) {
                    continue;
                }
            }
            #[cfg(feature = "vm")]
            {
                let source = fs::read_to_string(&entry)?;
                let name = module_name_of(&entry);
                let mut vm = embed::new_vm();
                match vm.interpret(&name, &source) {
                    embed::Outcome::Success => {
                        eprintln!("🧪  ok   {}", entry);
                        passed += 1;
                    }
                    _ => {
                        eprintln!("🧪  FAIL {}", entry);
                        failed += 1;
                    }
                }
            }
            #[cfg(not(feature = "vm"))]
            {
                eprintln!("🧪  Test: {} (feature `vm` absente, non exécuté)", entry);
            }
        }
    }
    eprintln!("✅  {passed} passé(s), {failed} échoué(s).");
    if failed > 0 {
        return Err(anyhow!("{failed} test(s) en échec"));
    }
    Ok(())
}

fn ensure_exists(path: &Utf8Path, what: &str) -> Result<()> {
    if !path.exists() {
        Err(anyhow!("{what} introuvable: {path}"))
    } else {
        Ok(())
    }
}

fn walk(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut out = Vec::new();
    for e in fs::read_dir(dir)? {
        let e = e?;
        let p = Utf8PathBuf::from_path_buf(e.path()).map_err(|_| anyhow!("UTF-8 path"))?;
        if p.is_dir() {
            out.extend(walk(&p)?);
        } else {
            out.push(p);
        }
    }
    Ok(out)
}
