fn main() {
    #[cfg(feature = "mpi")]
    {
        use std::env;

        println!("cargo:rerun-if-changed=src/mpi/mpi.c");
        println!("cargo:rerun-if-env-changed=MPI_INCLUDE_DIR");
        println!("cargo:rerun-if-env-changed=MPI_LIB_DIR");

        let mut build = cc::Build::new();
        build.file("src/mpi/mpi.c");

        if let Ok(include_dir) = env::var("MPI_INCLUDE_DIR") {
            build.include(include_dir);
        }
        if let Ok(lib_dir) = env::var("MPI_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", lib_dir);
        }
        build.compile("tiny_mpi_shim");
        println!("cargo:rustc-link-lib=mpi");
    }
}
