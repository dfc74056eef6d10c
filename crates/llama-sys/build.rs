use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(stub_engine)");
    println!("cargo:rerun-if-env-changed=LLAMA_PREBUILT_DIR");
    println!("cargo:rerun-if-env-changed=LLAMA_CPP_DIR");
    println!("cargo:rerun-if-changed=wrapper.h");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    // ── Determine build mode ──────────────────────────────────────────
    //
    // Mode A — **Stub** (`--features stub`): compile the in-process fake
    //   engine. No cmake, no bindgen, no native linking. This is what
    //   the test suites build against.
    //
    // Mode B — **Prebuilt**: set `LLAMA_PREBUILT_DIR` to a directory that
    //   contains `lib/{libllama.a, libggml*.a, …}` and `include/`.
    //   CMake is skipped entirely; only linking + bindgen run.
    //   This is the recommended path for Xcode / Gradle pipelines where
    //   llama.cpp was already compiled in a prior build stage.
    //
    // Mode C — **CMake**: set `LLAMA_CPP_DIR` to a llama.cpp checkout and
    //   build it from source.
    //
    // Neither env var set and no `stub` feature: warn loudly and fall
    // back to the stub engine so the workspace still builds on machines
    // without the native library.

    if env::var("CARGO_FEATURE_STUB").is_ok() {
        println!("cargo:rustc-cfg=stub_engine");
        return;
    }

    let (lib_dir, include_dir) = if let Ok(prebuilt) = env::var("LLAMA_PREBUILT_DIR") {
        let prebuilt = PathBuf::from(&prebuilt);
        assert!(
            prebuilt.exists(),
            "LLAMA_PREBUILT_DIR={} does not exist",
            prebuilt.display()
        );
        let lib = if prebuilt.join("lib64").exists() {
            prebuilt.join("lib64")
        } else {
            prebuilt.join("lib")
        };
        let inc = prebuilt.join("include");
        println!(
            "cargo:warning=Using prebuilt llama.cpp from {}",
            prebuilt.display()
        );
        (lib, inc)
    } else if let Ok(src) = env::var("LLAMA_CPP_DIR") {
        // ── CMake build ───────────────────────────────────────────────
        let llama_cpp_dir = PathBuf::from(&src);
        assert!(
            llama_cpp_dir.join("CMakeLists.txt").exists(),
            "llama.cpp source not found at {}",
            llama_cpp_dir.display()
        );

        let mut cfg = cmake::Config::new(&llama_cpp_dir);
        cfg.define("BUILD_SHARED_LIBS", "OFF")
            .define("LLAMA_BUILD_SERVER", "OFF")
            .define("LLAMA_BUILD_TESTS", "OFF")
            .define("LLAMA_BUILD_EXAMPLES", "OFF")
            .define("LLAMA_BUILD_TOOLS", "OFF")
            .define("LLAMA_BUILD_COMMON", "OFF");

        match target_os.as_str() {
            "macos" => {
                cfg.define("GGML_METAL", "ON");
            }
            "ios" => {
                // The shader library must be embedded — app bundles cannot
                // ship a loose .metallib next to a static archive.
                cfg.define("GGML_METAL", "ON")
                    .define("GGML_METAL_EMBED_LIBRARY", "ON");
            }
            _ => {}
        }
        if env::var("CARGO_FEATURE_VULKAN").is_ok() {
            cfg.define("GGML_VULKAN", "ON");
        }

        let dst = cfg.build();

        let lib = if dst.join("lib64").exists() {
            dst.join("lib64")
        } else {
            dst.join("lib")
        };
        let inc = dst.join("include");
        (lib, inc)
    } else {
        println!(
            "cargo:warning=Neither LLAMA_PREBUILT_DIR nor LLAMA_CPP_DIR is set; \
             building llama-sys against the stub engine. Text generation will \
             NOT use a real model."
        );
        println!("cargo:rustc-cfg=stub_engine");
        return;
    };

    // ── Link libraries ────────────────────────────────────────────────
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=llama");

    // ggml libraries — probe which ones exist
    for name in &["ggml", "ggml-base", "ggml-cpu", "ggml-blas"] {
        if lib_dir.join(format!("lib{name}.a")).exists() {
            println!("cargo:rustc-link-lib=static={name}");
        }
    }

    if env::var("CARGO_FEATURE_VULKAN").is_ok() && lib_dir.join("libggml-vulkan.a").exists() {
        println!("cargo:rustc-link-lib=static=ggml-vulkan");
        println!("cargo:rustc-link-lib=vulkan");
    }

    // Platform system libraries
    match target_os.as_str() {
        "linux" => {
            println!("cargo:rustc-link-lib=stdc++");
            println!("cargo:rustc-link-lib=m");
            println!("cargo:rustc-link-lib=pthread");
            println!("cargo:rustc-link-lib=gomp"); // OpenMP (used by ggml-cpu)
        }
        "android" => {
            println!("cargo:rustc-link-lib=c++_shared");
            println!("cargo:rustc-link-lib=log");
        }
        "macos" | "ios" => {
            if lib_dir.join("libggml-metal.a").exists() {
                println!("cargo:rustc-link-lib=static=ggml-metal");
            }
            for fw in &["Accelerate", "Metal", "MetalKit", "Foundation"] {
                println!("cargo:rustc-link-lib=framework={fw}");
            }
            println!("cargo:rustc-link-lib=c++");
        }
        "windows" => {
            println!("cargo:rustc-link-lib=msvcrt");
        }
        _ => {}
    }

    // ── Generate Rust bindings ────────────────────────────────────────
    let bindings = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(format!("-I{}", include_dir.display()))
        .allowlist_function("llama_.*")
        .allowlist_function("ggml_.*")
        .allowlist_type("llama_.*")
        .allowlist_type("ggml_.*")
        .allowlist_var("LLAMA_.*")
        .allowlist_var("GGML_.*")
        .derive_default(true)
        .size_t_is_usize(true)
        .generate()
        .expect("Failed to generate bindings");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out.join("bindings.rs"))
        .expect("Failed to write bindings");
}
