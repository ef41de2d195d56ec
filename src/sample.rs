// Static fallback listings served when a site can't be reached
// Deterministic on purpose: a degraded response must never fail or vary between calls

use crate::product::{Product, Site};

struct SampleListing {
    title: &'static str,
    price: f64,
    currency: &'static str,
    brand: &'static str,
    size: &'static str,
    condition: &'static str,
    seller: &'static str,
    url: &'static str,
    image_url: &'static str,
}

const VINTED_SAMPLES: &[SampleListing] = &[
    SampleListing {
        title: "Vintage Levi's 501 Jeans - Size 32",
        price: 35.0,
        currency: "GBP",
        brand: "Levi's",
        size: "32",
        condition: "Very Good",
        seller: "vintage_finds_uk",
        url: "https://www.vinted.co.uk/items/123456-vintage-levis-501-jeans",
        image_url: "https://images.vinted.net/photos/123456.jpg",
    },
    SampleListing {
        title: "Zara Floral Summer Dress - Medium",
        price: 18.0,
        currency: "GBP",
        brand: "Zara",
        size: "M",
        condition: "Good",
        seller: "fashionista_london",
        url: "https://www.vinted.co.uk/items/789012-zara-floral-summer-dress",
        image_url: "https://images.vinted.net/photos/789012.jpg",
    },
    SampleListing {
        title: "Nike Air Max 90 Trainers - UK 8",
        price: 65.0,
        currency: "GBP",
        brand: "Nike",
        size: "UK 8",
        condition: "Good",
        seller: "sneaker_head_mcr",
        url: "https://www.vinted.co.uk/items/345678-nike-air-max-90-trainers",
        image_url: "https://images.vinted.net/photos/345678.jpg",
    },
    SampleListing {
        title: "H&M Knit Sweater - Large",
        price: 12.0,
        currency: "GBP",
        brand: "H&M",
        size: "L",
        condition: "Very Good",
        seller: "thrift_lover_bristol",
        url: "https://www.vinted.co.uk/items/456789-hm-knit-sweater",
        image_url: "https://images.vinted.net/photos/456789.jpg",
    },
    SampleListing {
        title: "Adidas Originals Hoodie - Medium",
        price: 28.0,
        currency: "GBP",
        brand: "Adidas",
        size: "M",
        condition: "Excellent",
        seller: "streetwear_glasgow",
        url: "https://www.vinted.co.uk/items/567890-adidas-originals-hoodie",
        image_url: "https://images.vinted.net/photos/567890.jpg",
    },
];

const EBAY_SAMPLES: &[SampleListing] = &[
    SampleListing {
        title: "Apple iPhone 13 128GB Unlocked",
        price: 389.99,
        currency: "USD",
        brand: "Apple",
        size: "128GB",
        condition: "Used",
        seller: "tech_resale_us",
        url: "https://www.ebay.com/itm/100000000001",
        image_url: "https://i.ebayimg.com/images/g/sample1/s-l500.jpg",
    },
    SampleListing {
        title: "Nike Air Jordan 1 Retro High OG",
        price: 179.0,
        currency: "USD",
        brand: "Nike",
        size: "US 10",
        condition: "New with box",
        seller: "sole_supply",
        url: "https://www.ebay.com/itm/100000000002",
        image_url: "https://i.ebayimg.com/images/g/sample2/s-l500.jpg",
    },
    SampleListing {
        title: "Sony WH-1000XM4 Wireless Headphones",
        price: 198.5,
        currency: "USD",
        brand: "Sony",
        size: "One Size",
        condition: "Used",
        seller: "audio_outlet",
        url: "https://www.ebay.com/itm/100000000003",
        image_url: "https://i.ebayimg.com/images/g/sample3/s-l500.jpg",
    },
    SampleListing {
        title: "Burberry Classic Check Cashmere Scarf",
        price: 245.0,
        currency: "USD",
        brand: "Burberry",
        size: "One Size",
        condition: "Pre-owned",
        seller: "luxe_closet_ny",
        url: "https://www.ebay.com/itm/100000000004",
        image_url: "https://i.ebayimg.com/images/g/sample4/s-l500.jpg",
    },
];

const VESTIAIRE_SAMPLES: &[SampleListing] = &[
    SampleListing {
        title: "Chanel Classic Flap Bag - Medium",
        price: 4250.0,
        currency: "GBP",
        brand: "Chanel",
        size: "Medium",
        condition: "Very Good",
        seller: "luxury_boutique_paris",
        url: "https://www.vestiairecollective.co.uk/women/bags/handbags/chanel/classic-flap-bag-123456.shtml",
        image_url: "https://images.vestiairecollective.com/produit/123456/abc.jpg",
    },
    SampleListing {
        title: "Louis Vuitton Neverfull MM",
        price: 1180.0,
        currency: "GBP",
        brand: "Louis Vuitton",
        size: "MM",
        condition: "Good",
        seller: "vintage_finds_london",
        url: "https://www.vestiairecollective.co.uk/women/bags/tote-bags/louis-vuitton/neverfull-mm-789012.shtml",
        image_url: "https://images.vestiairecollective.com/produit/789012/def.jpg",
    },
    SampleListing {
        title: "Hermès Birkin 30 Togo Leather",
        price: 8900.0,
        currency: "GBP",
        brand: "Hermès",
        size: "30",
        condition: "Excellent",
        seller: "hermes_specialist_milan",
        url: "https://www.vestiairecollective.co.uk/women/bags/handbags/hermes/birkin-30-345678.shtml",
        image_url: "https://images.vestiairecollective.com/produit/345678/ghi.jpg",
    },
    SampleListing {
        title: "Gucci Horsebit 1955 Mini Bag",
        price: 890.0,
        currency: "GBP",
        brand: "Gucci",
        size: "Mini",
        condition: "Very Good",
        seller: "gucci_lover_ny",
        url: "https://www.vestiairecollective.co.uk/women/bags/shoulder-bags/gucci/horsebit-1955-mini-456789.shtml",
        image_url: "https://images.vestiairecollective.com/produit/456789/jkl.jpg",
    },
    SampleListing {
        title: "Prada Re-Edition 2005 Nylon Bag",
        price: 650.0,
        currency: "GBP",
        brand: "Prada",
        size: "One Size",
        condition: "Good",
        seller: "prada_vintage_paris",
        url: "https://www.vestiairecollective.co.uk/women/bags/shoulder-bags/prada/re-edition-2005-nylon-567890.shtml",
        image_url: "https://images.vestiairecollective.com/produit/567890/mno.jpg",
    },
];

fn samples_for(site: Site) -> &'static [SampleListing] {
    match site {
        Site::Vinted => VINTED_SAMPLES,
        Site::Ebay => EBAY_SAMPLES,
        Site::Vestiaire => VESTIAIRE_SAMPLES,
    }
}

// Cycles the site's samples up to `count` listings
pub fn sample_listings(site: Site, count: usize) -> Vec<Product> {
    samples_for(site)
        .iter()
        .cycle()
        .take(count)
        .enumerate()
        .map(|(i, sample)| Product {
            id: Some(format!("sample-{}-{}", site, i + 1)),
            site,
            title: sample.title.to_string(),
            price: Some(sample.price),
            currency: Some(sample.currency.to_string()),
            brand: Some(sample.brand.to_string()),
            size: Some(sample.size.to_string()),
            condition: Some(sample.condition.to_string()),
            image_url: Some(sample.image_url.to_string()),
            url: Some(sample.url.to_string()),
            seller: Some(sample.seller.to_string()),
        })
        .collect()
}
