use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");

    // Extension builds are loaded by a running interpreter and must not link libpython.
    if env::var_os("CARGO_FEATURE_EXTENSION_MODULE").is_some() {
        return;
    }

    let python = env::var("PYO3_PYTHON").unwrap_or_else(|_| "python3".to_string());

    if let Ok(output) = Command::new(&python).args(["--version"]).output() {
        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            println!("cargo:warning=Embedding {}", version.trim());
        }
    }

    // Tests embed the interpreter, so the linker needs to find libpython.
    if let Ok(output) = Command::new(&python)
        .args([
            "-c",
            "import sysconfig; print(sysconfig.get_config_var('LIBDIR'))",
        ])
        .output()
    {
        if output.status.success() {
            let libdir = String::from_utf8_lossy(&output.stdout);
            let libdir = libdir.trim();
            if !libdir.is_empty() && libdir != "None" {
                println!("cargo:rustc-link-search=native={libdir}");
                if env::var("CARGO_CFG_TARGET_FAMILY").as_deref() == Ok("unix") {
                    println!("cargo:rustc-link-arg=-Wl,-rpath,{libdir}");
                }
            }
        }
    }
}
