mod host;
mod http;
mod modbus;
mod mqtt;
#[cfg(test)]
mod testutil;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
