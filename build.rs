fn main() {
    // Only the device build needs the ESP-IDF environment; host builds and
    // tests compile the library without it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
