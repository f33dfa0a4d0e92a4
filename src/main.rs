#[tokio::main]
async fn main() {
    if let Err(e) = sehat_caregiver::run().await {
        eprintln!("sehat-caregiver: {e}");
        std::process::exit(1);
    }
}
