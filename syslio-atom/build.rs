fn main() {
  cfg_aliases::cfg_aliases! {
      linux: { target_os = "linux" },
      // preadv2/pwritev2 with RWF_NOWAIT are only bound for glibc targets.
      nowait: { all(target_os = "linux", target_env = "gnu") },
  }
}
