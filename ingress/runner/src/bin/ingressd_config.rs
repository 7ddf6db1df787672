use ingresscore::config::IngressConfig;

fn main() {
    let config =
        serdeconv::to_toml_string(&IngressConfig::default()).expect("Failed to generate config file");

    println!("{}", config);
}
