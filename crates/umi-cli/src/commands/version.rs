use miette::Result;
use umi_core::version::version_string;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "name": "umi",
                "version": umi_core::VERSION,
                "schema_version": umi_core::version::SCHEMA_VERSION,
            })
        );
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
