//! Check backend availability.

pub fn run() -> anyhow::Result<()> {
    println!("Blinkcap System Check");
    println!("{}", "=".repeat(50));

    println!("[OK] Synthetic source + passthrough codec: always available");

    check_gst_backends();

    Ok(())
}

#[cfg(feature = "gst")]
fn check_gst_backends() {
    if let Err(e) = gstreamer::init() {
        println!("[FAIL] GStreamer: initialization failed ({e})");
        return;
    }
    println!("[OK] GStreamer initialized");

    for (element, purpose) in [
        ("v4l2src", "camera capture"),
        ("vp8enc", "VP8 encoding"),
        ("vp8dec", "VP8 decoding"),
        ("videoconvert", "format conversion"),
    ] {
        match gstreamer::ElementFactory::find(element) {
            Some(_) => println!("[OK] {element} ({purpose})"),
            None => println!("[FAIL] {element} ({purpose}) not found; install the matching GStreamer plugin"),
        }
    }

    match blinkcap_capture_engine::gst::detect_preferred_camera_device() {
        Some(device) => println!("[OK] Preferred camera device: {device}"),
        None => println!("[WARN] No camera device detected under /dev"),
    }
}

#[cfg(not(feature = "gst"))]
fn check_gst_backends() {
    println!("[WARN] Live camera backends disabled; rebuild with --features gst");
}
