use dcc_kernel::prelude::*;
use dcc_kernel::test_harness::StubProvider;
use proptest::prelude::*;

const KINDS: [&str; 3] = ["h0", "h1", "h2"];

fn type_metadata() -> ComponentMetadata {
    KINDS.iter().fold(
        ComponentMetadata::new("prop.Component")
            .with_attribute("name", "prop")
            .with_attribute("architecture", "false")
            .with_attribute("immediate", "false"),
        |metadata, kind| metadata.with_element(Element::new(*kind)),
    )
}

proptest! {
    #[test]
    fn prop_validity_tracks_published_providers(
        operations in proptest::collection::vec((0..KINDS.len(), any::<bool>()), 1..60)
    ) {
        let registry = Arc::new(InMemoryRegistry::new());
        let names = Arc::new(NameRegistry::new());
        let factory = ComponentFactory::builder(type_metadata(), registry.clone(), names)
            .build()
            .unwrap();
        factory.start().unwrap();

        let mut published: Vec<Vec<(Arc<StubProvider>, ProviderRef)>> = vec![Vec::new(); KINDS.len()];
        let mut all = Vec::new();
        let mut ever_valid = false;

        for (kind, add) in operations {
            if add {
                let provider = Arc::new(StubProvider::new(&HandlerName::new(KINDS[kind])));
                let reference = registry.register(provider.clone());
                all.push(Arc::clone(&provider));
                published[kind].push((provider, reference));
            } else if let Some((_, reference)) = published[kind].pop() {
                registry.unregister(reference.id());
            }

            let expected = published.iter().all(|p| !p.is_empty());
            prop_assert_eq!(factory.state().is_valid(), expected);
            ever_valid |= expected;
            if expected {
                prop_assert!(factory.component_description().is_some());
                prop_assert!(factory.missing_handlers().is_empty());
            }
        }

        // the description is computed once, one contribution per requirement
        let contributions: usize = all.iter().map(|provider| provider.initializations()).sum();
        prop_assert_eq!(contributions, if ever_valid { KINDS.len() } else { 0 });
    }
}
