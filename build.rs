use std::{env, path::PathBuf};

fn main() {
    println!("cargo::rustc-check-cfg=cfg(libraw_ffi)");
    println!("cargo:rerun-if-env-changed=LIBRAW_DIR");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("CARGO_FEATURE_LIBRAW").is_none() {
        return;
    }

    println!("cargo:rustc-cfg=libraw_ffi");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let prefix = env::var("LIBRAW_DIR").ok().map(PathBuf::from);

    // Link LibRaw (libraw.so / libraw.dylib / raw.lib)
    if let Some(prefix) = &prefix {
        println!("cargo:rustc-link-search=native={}", prefix.join("lib").display());
    }
    println!("cargo:rustc-link-lib=dylib=raw");

    //
    // ---- Generate LibRaw C API bindings ----
    //
    let mut builder = bindgen::Builder::default()
        .header_contents("libraw_wrapper.h", "#include <libraw/libraw.h>\n")
        // Lifecycle
        .allowlist_function("libraw_init")
        .allowlist_function("libraw_close")
        .allowlist_function("libraw_recycle")
        .allowlist_function("libraw_recycle_datastream")
        // Sources
        .allowlist_function("libraw_open_file")
        .allowlist_function("libraw_open_file_ex")
        .allowlist_function("libraw_open_buffer")
        // Decoding
        .allowlist_function("libraw_unpack")
        .allowlist_function("libraw_unpack_thumb")
        .allowlist_function("libraw_dcraw_process")
        .allowlist_function("libraw_dcraw_ppm_tiff_writer")
        .allowlist_function("libraw_set_output_tif")
        .allowlist_function("libraw_set_output_bps")
        .allowlist_function("libraw_set_dataerror_handler")
        // Informational
        .allowlist_function("libraw_strerror")
        .allowlist_function("libraw_version")
        .allowlist_function("libraw_versionNumber")
        .allowlist_function("libraw_cameraCount")
        .allowlist_function("libraw_cameraList")
        // Types
        .allowlist_type("libraw_data_t")
        .allowlist_type("data_callback")
        .raw_line("// Mark extern blocks as unsafe for Rust 2024");

    if let Some(prefix) = &prefix {
        builder = builder.clang_arg(format!("-I{}", prefix.join("include").display()));
    }

    let bindings = builder
        .generate()
        .expect("Unable to generate LibRaw bindings");

    let out_path = out_dir.join("libraw_bindings.rs");
    bindings
        .write_to_file(&out_path)
        .expect("Couldn't write LibRaw bindings!");

    // Read the generated file and add unsafe to extern blocks
    let contents = std::fs::read_to_string(&out_path).unwrap();
    let fixed = contents.replace("extern \"C\" {", "unsafe extern \"C\" {");
    std::fs::write(&out_path, fixed).unwrap();
}
