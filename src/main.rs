//! Binary entrypoint; all wiring lives in `lib.rs` so integration
//! tests can build the same `Router` in-process.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    agent_supervisor::run().await
}
